//! Path Validation module for secure file path handling
//!
//! This module provides comprehensive security validation for file paths to prevent
//! path traversal attacks and ensure safe file operations. Receipt uploads arrive
//! with client-supplied filenames, so every path that touches the media directory
//! goes through these checks first. It implements multiple layers of validation
//! including:
//!
//! - Path traversal attack prevention (.. directory traversal)
//! - Absolute path restrictions
//! - Filename sanitization and validation
//! - Character encoding validation
//! - Length limits and constraints
//! - Reserved name checking (Windows reserved names)
//!
//! ## Security Features
//!
//! ### Path Traversal Protection
//! - Prevents `..` directory traversal attacks
//! - Blocks null byte injection (`\0`)
//! - Checks for encoded traversal sequences
//!
//! ### Absolute Path Restrictions
//! - Blocks absolute paths that could escape intended directories
//! - Allows only the service's own mounts (media, share) and temp directories
//! - Prevents access to system directories
//!
//! ### Filename Validation
//! - Sanitizes filenames to prevent injection attacks
//! - Checks for reserved names (CON, PRN, etc.)
//! - Enforces length limits
//!
//! ## Usage Examples
//!
//! ```rust
//! use receipt_ocr::path_validation::{validate_file_path, sanitize_filename};
//!
//! // Validate a file path for security
//! match validate_file_path("/media/ocr/receipt.jpg") {
//!     Ok(()) => println!("Path is safe"),
//!     Err(e) => println!("Path validation failed: {}", e),
//! }
//!
//! // Sanitize an upload filename
//! let safe_name = sanitize_filename("unsafe<name>.jpg");
//! assert_eq!(safe_name, "unsafe_name_.jpg");
//! ```

use std::path::Path;

/// Errors that can occur during path validation
#[derive(Debug, Clone, PartialEq)]
pub enum PathValidationError {
    /// Path contains dangerous traversal sequences (..)
    PathTraversal,
    /// Path contains null bytes
    NullByte,
    /// Path is absolute and not in allowed directories
    AbsolutePathNotAllowed,
    /// Path contains invalid characters
    InvalidCharacters,
    /// Filename is too long
    FilenameTooLong,
    /// Path is too long
    PathTooLong,
    /// Filename uses reserved name
    ReservedName,
    /// Invalid UTF-8 encoding
    InvalidEncoding,
    /// Empty path provided
    EmptyPath,
}

/// Result type for path validation operations
pub type PathValidationResult<T> = Result<T, PathValidationError>;

/// Maximum allowed filename length (255 bytes on most filesystems)
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Maximum allowed path length (4096 bytes on most systems)
pub const MAX_PATH_LENGTH: usize = 4096;

/// Reserved filenames that should not be used (Windows compatibility)
pub const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters that are not allowed in filenames
pub const FORBIDDEN_FILENAME_CHARS: &[char] = &[
    '<', '>', ':', '"', '|', '?', '*', '\0', // null byte
    '\x01', '\x02', '\x03', '\x04', '\x05', '\x06', '\x07', // control chars
    '\x08', '\x09', '\x0a', '\x0b', '\x0c', '\x0d', '\x0e', '\x0f', // control chars
    '\x10', '\x11', '\x12', '\x13', '\x14', '\x15', '\x16', '\x17', // control chars
    '\x18', '\x19', '\x1a', '\x1b', '\x1c', '\x1d', '\x1e', '\x1f', // control chars
];

/// Directories that are considered safe for absolute paths. Covers the
/// service's own mounts (uploaded receipts, result storage) and the usual
/// temp locations.
pub const ALLOWED_ABSOLUTE_PATH_PREFIXES: &[&str] = &[
    "/media",
    "/share",
    "/tmp",
    "/var/tmp",
    "/private/tmp",
    "/private/var/tmp",
    "/var/folders", // macOS temp directories
];

/// Validate a file path for security issues
///
/// Performs comprehensive security validation including:
/// - Path traversal attack prevention
/// - Absolute path restrictions
/// - Character encoding validation
/// - Length limits
/// - Reserved name checking
///
/// # Arguments
///
/// * `path` - The file path to validate
///
/// # Returns
///
/// Returns `Ok(())` if the path is safe, or `PathValidationError` if validation fails
///
/// # Examples
///
/// ```rust
/// use receipt_ocr::path_validation::validate_file_path;
///
/// // Safe relative path
/// assert!(validate_file_path("receipt_scan.jpg").is_ok());
///
/// // Path traversal attack (blocked)
/// assert!(validate_file_path("../etc/passwd").is_err());
///
/// // Absolute path in the media mount (allowed)
/// assert!(validate_file_path("/media/ocr/receipt.jpg").is_ok());
///
/// // Absolute path in a system directory (blocked)
/// assert!(validate_file_path("/etc/passwd").is_err());
/// ```
pub fn validate_file_path(path: &str) -> PathValidationResult<()> {
    // Check for empty path
    if path.is_empty() {
        return Err(PathValidationError::EmptyPath);
    }

    // Check path length
    if path.len() > MAX_PATH_LENGTH {
        return Err(PathValidationError::PathTooLong);
    }

    // Check for null bytes
    if path.contains('\0') {
        return Err(PathValidationError::NullByte);
    }

    // Check for path traversal attacks
    if contains_path_traversal(path) {
        return Err(PathValidationError::PathTraversal);
    }

    // Validate absolute paths
    validate_absolute_path(path)?;

    // Convert to Path for further validation
    let path_obj = Path::new(path);

    // Validate filename if present
    if let Some(filename) = path_obj.file_name() {
        let filename_str = filename.to_string_lossy();
        validate_filename(&filename_str)?;
    }

    Ok(())
}

/// Check if a path contains path traversal sequences
///
/// Detects various forms of directory traversal attacks:
/// - `..` as a directory component
/// - URL-encoded traversal sequences
fn contains_path_traversal(path: &str) -> bool {
    // Check for basic .. patterns
    if path.contains("..") {
        // More sophisticated check: look for .. as directory components
        let path_obj = Path::new(path);

        // Check each component for ..
        for component in path_obj.components() {
            if let std::path::Component::ParentDir = component {
                return true;
            }
        }
    }

    // Check for encoded traversal (URL encoded)
    if path.contains("%2e%2e") || path.contains("%2E%2E") {
        return true;
    }

    false
}

/// Validate absolute paths to ensure they are in allowed directories
fn validate_absolute_path(path: &str) -> PathValidationResult<()> {
    let path_obj = Path::new(path);

    if path_obj.is_absolute() {
        // Check if path starts with any allowed prefix
        let path_str = path_obj.to_string_lossy();

        let is_allowed = ALLOWED_ABSOLUTE_PATH_PREFIXES
            .iter()
            .any(|prefix| path_str.starts_with(prefix));

        if !is_allowed {
            return Err(PathValidationError::AbsolutePathNotAllowed);
        }
    }

    Ok(())
}

/// Validate a filename for security issues
pub fn validate_filename(filename: &str) -> PathValidationResult<()> {
    // Check length
    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(PathValidationError::FilenameTooLong);
    }

    // Check for empty filename
    if filename.is_empty() {
        return Err(PathValidationError::EmptyPath);
    }

    // Check for reserved names (case-insensitive)
    let filename_upper = filename.to_uppercase();
    let name_without_ext = filename_upper.split('.').next().unwrap_or("");

    if RESERVED_NAMES.contains(&name_without_ext) {
        return Err(PathValidationError::ReservedName);
    }

    // Check for forbidden characters
    if filename
        .chars()
        .any(|c| FORBIDDEN_FILENAME_CHARS.contains(&c))
    {
        return Err(PathValidationError::InvalidCharacters);
    }

    // Check for control characters (additional validation)
    if filename
        .chars()
        .any(|c| c.is_control() && c != '\t' && c != '\n' && c != '\r')
    {
        return Err(PathValidationError::InvalidCharacters);
    }

    Ok(())
}

/// Sanitize a filename by removing or replacing dangerous characters
///
/// This function makes upload filenames safe by:
/// - Removing or replacing forbidden characters
/// - Trimming whitespace
/// - Handling empty results
/// - Ensuring the result is a valid filename
///
/// # Examples
///
/// ```rust
/// use receipt_ocr::path_validation::sanitize_filename;
///
/// assert_eq!(sanitize_filename("receipt_scan.jpg"), "receipt_scan.jpg");
/// assert_eq!(sanitize_filename("unsafe<name>.jpg"), "unsafe_name_.jpg");
/// assert_eq!(sanitize_filename("file with spaces.jpg"), "file with spaces.jpg");
/// ```
pub fn sanitize_filename(filename: &str) -> String {
    // Start with the original filename
    let mut sanitized = filename.to_string();

    // Replace forbidden characters with underscores
    for &forbidden in FORBIDDEN_FILENAME_CHARS {
        sanitized = sanitized.replace(forbidden, "_");
    }

    // Trim whitespace
    sanitized = sanitized.trim().to_string();

    // Handle empty result
    if sanitized.is_empty() {
        sanitized = "unnamed_file".to_string();
    }

    // Ensure it doesn't start or end with dots (Windows issues)
    sanitized = sanitized.trim_matches('.').trim().to_string();
    if sanitized.is_empty() {
        sanitized = "unnamed_file".to_string();
    }

    // Limit length
    if sanitized.len() > MAX_FILENAME_LENGTH {
        // Try to preserve extension
        if let Some(dot_pos) = sanitized.rfind('.') {
            let name = &sanitized[..dot_pos];
            let ext = &sanitized[dot_pos..];
            let max_name_len = MAX_FILENAME_LENGTH.saturating_sub(ext.len());
            sanitized = format!("{}{}", &name[..max_name_len.min(name.len())], ext);
        } else {
            sanitized = sanitized[..MAX_FILENAME_LENGTH].to_string();
        }
    }

    sanitized
}

/// Check if a path is safe for writing operations
///
/// This is a convenience function that combines path validation
/// with additional checks for write operations. The results store
/// runs it against its target file before accepting writes.
pub fn validate_path_for_writing(path: &str) -> PathValidationResult<()> {
    // Basic validation
    validate_file_path(path)?;

    // Additional checks for writing
    let path_obj = Path::new(path);

    // Check parent directory exists and is writable
    if let Some(parent) = path_obj.parent() {
        if !parent.exists() {
            return Err(PathValidationError::InvalidCharacters); // Reuse error
        }
        if !parent.is_dir() {
            return Err(PathValidationError::InvalidCharacters); // Parent not a directory
        }
    }

    Ok(())
}

/// Generate a safe filename for an upload that arrived without one
///
/// Creates a filename that is guaranteed to be safe and unique enough
/// within the media directory.
///
/// # Examples
///
/// ```rust
/// use receipt_ocr::path_validation::generate_safe_temp_filename;
///
/// let filename = generate_safe_temp_filename(Some("upload"), Some("jpg"));
/// assert!(filename.starts_with("upload_"));
/// assert!(filename.ends_with(".jpg"));
/// ```
pub fn generate_safe_temp_filename(prefix: Option<&str>, extension: Option<&str>) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let random_part = (timestamp % 1000000) as u32;

    let mut filename = prefix.unwrap_or("temp").to_string();
    filename.push_str(&format!("_{}", random_part));

    if let Some(ext) = extension {
        // Sanitize extension
        let safe_ext = sanitize_filename(ext);
        if !safe_ext.is_empty() && !safe_ext.contains('.') {
            filename.push('.');
            filename.push_str(&safe_ext);
        }
    }

    // Final sanitization
    sanitize_filename(&filename)
}

impl std::fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathValidationError::PathTraversal => {
                write!(f, "Path contains directory traversal sequences")
            }
            PathValidationError::NullByte => write!(f, "Path contains null bytes"),
            PathValidationError::AbsolutePathNotAllowed => {
                write!(f, "Absolute path not in allowed directories")
            }
            PathValidationError::InvalidCharacters => write!(f, "Path contains invalid characters"),
            PathValidationError::FilenameTooLong => write!(f, "Filename is too long"),
            PathValidationError::PathTooLong => write!(f, "Path is too long"),
            PathValidationError::ReservedName => write!(f, "Filename uses reserved name"),
            PathValidationError::InvalidEncoding => write!(f, "Path contains invalid encoding"),
            PathValidationError::EmptyPath => write!(f, "Path is empty"),
        }
    }
}

impl std::error::Error for PathValidationError {}
