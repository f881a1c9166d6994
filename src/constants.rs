pub const DEFAULT_WORKER_COUNT: usize = 0;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_ROW_BATCH_SIZE: usize = 256;
pub const DEFAULT_CHUNK_MAX_LINES: usize = 10_000;
pub const DEFAULT_MIRROR_CONTENT_MAX_CHARS: usize = 2_000;
pub const DEFAULT_PATH_ONLY_SAMPLE_LIMIT: usize = 50;
pub const DEFAULT_IO_BUFFER_SIZE_KB: usize = 64;
pub const DEFAULT_BINDER_CACHE_CAPACITY: usize = 4_096;
pub const DEFAULT_CLASSIFY_BATCH_LINES: usize = 10_000;

pub const MIN_WORKER_COUNT: usize = 1;
pub const MAX_WORKER_COUNT: usize = 64;
pub const MIN_QUEUE_CAPACITY: usize = 1;
pub const MAX_QUEUE_CAPACITY: usize = 65_536;
pub const MIN_ROW_BATCH_SIZE: usize = 1;
pub const MAX_ROW_BATCH_SIZE: usize = 65_536;
pub const MIN_CHUNK_MAX_LINES: usize = 1;
pub const MAX_CHUNK_MAX_LINES: usize = 10_000_000;
pub const MIN_MIRROR_CONTENT_MAX_CHARS: usize = 16;

pub const BYTES_PER_KB: usize = 1024;
pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

pub const PATH_SENTINEL: &str = "unknown";
pub const RECORD_DELIMITER: char = ';';
pub const ROW_SEPARATOR: &str = " ; ";
pub const UNIDENTIFIED_FIELD: &str = "UNIDENTIFIED_FIELD";
pub const NO_FIELD_REASON: &str = "reason=NO_FIELD_PATTERN";
pub const TRUNCATION_MARKER: &str = "...";

pub const EXTRACTED_CATEGORY: &str = "extracted";
pub const MIRRORED_CATEGORY: &str = "mirror";
pub const EXTRACTED_DIR_NAME: &str = "fields_identified";
pub const MIRRORED_DIR_NAME: &str = "mirror";
pub const CHUNK_FILE_EXTENSION: &str = "txt";
pub const STAGING_DIR_NAME: &str = ".staging";
pub const STAGED_FILE_EXTENSION: &str = "part";

pub const CHECKPOINT_FILE_NAME: &str = "resume.log";
pub const CHECKPOINT_COMMENT_PREFIX: char = '#';
pub const SUMMARY_FILE_NAME: &str = "summary.txt";
pub const DEFAULT_CONFIG_FILE_NAME: &str = "pii_sift_config.json";
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "output_pii";
pub const DEFAULT_INPUT_EXTENSION: &str = "txt";

pub const AADHAAR_DIGITS: usize = 12;
