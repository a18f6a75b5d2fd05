/// Application name
pub const APP_NAME: &str = "duet";

/// PBKDF2 iteration count used for room keys
pub const ROOM_KEY_ITERATIONS: u32 = 500;

/// Room key output length in bits (PBKDF2 output, AES key size)
pub const ROOM_KEY_BITS: u32 = 128;

/// AES-CBC initialization vector size in bytes
pub const IV_SIZE: usize = 16;

/// Minimum interval between two applied progress updates of one transfer
pub const PROGRESS_INTERVAL_MS: u64 = 700;

/// Connectivity probe period in seconds
pub const PROBE_INTERVAL_SECS: u64 = 6;

/// Connectivity probe request timeout in seconds
pub const PROBE_TIMEOUT_SECS: u64 = 4;

/// Server path accepting multipart attachment uploads
pub const UPLOAD_PATH: &str = "/upload";

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD_NAME: &str = "file";

/// Body the upload endpoint returns on success
pub const UPLOAD_ACK_OK: &str = "ok";

/// File name given to recorded voice notes
pub const VOICE_FILE_NAME: &str = "voice";

/// Extensions treated as music when classifying generic files
pub const MUSIC_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".aac", ".flac", ".ogg", ".m4a"];
