//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: u8 = 1;

/// Validation error - invalid values, options or release name
pub const VALIDATION_ERROR: u8 = 2;

/// Template error - template rendering failed
pub const TEMPLATE_ERROR: u8 = 3;

/// Chart error - invalid chart structure or Chart.yaml
pub const CHART_ERROR: u8 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: u8 = 5;

/// Release or revision not found
pub const NOT_FOUND: u8 = 6;

/// Name in use, already exists, or another operation in progress
pub const CONFLICT: u8 = 7;

/// A hook or resource failed in the cluster
pub const CLUSTER_FAILURE: u8 = 8;

/// Resources did not become ready in time
pub const TIMEOUT: u8 = 9;

/// The API server could not be reached (following sysexits.h EX_UNAVAILABLE)
pub const UNAVAILABLE: u8 = 69;

/// Interrupted; the operation may still complete (128 + SIGINT)
pub const CANCELLED: u8 = 130;
