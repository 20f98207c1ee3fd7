//! Crate-wide constants.

/// Application name, used for the build directory and lock messages.
pub const APP_NAME: &str = "kiln";

/// Length of truncated object hashes (command signatures).
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default build root directory name, relative to the project root.
pub const BUILD_DIR_NAME: &str = ".kiln";

/// Default build configuration name.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// File extension of persisted build data files.
pub const BUILD_DATA_EXTENSION: &str = "kiln.json";

/// Environment variable overriding the build root.
pub const BUILD_DIR_ENV: &str = "KILN_BUILD_DIR";

/// Environment variable overriding the default job count.
pub const JOBS_ENV: &str = "KILN_JOBS";
