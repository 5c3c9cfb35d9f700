//! Custom assertion macros
//!
//! Shorter assertions for queue and status checks, with messages that show
//! the whole snapshot on failure.

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error matching `$pattern`
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert the sync status and queue counts of a service
///
/// ```ignore
/// assert_status!(service, SyncStatus::Syncing, pending = 1, failed = 0);
/// ```
#[macro_export]
macro_rules! assert_status {
    ($service:expr, $expected:expr) => {{
        let status = $service.status().await;
        assert_eq!(status.sync_status, $expected, "unexpected status: {:#?}", status);
        status
    }};
    ($service:expr, $expected:expr, pending = $pending:expr, failed = $failed:expr) => {{
        let status = $service.status().await;
        assert_eq!(status.sync_status, $expected, "unexpected status: {:#?}", status);
        assert_eq!(status.pending_operations, $pending, "pending count: {:#?}", status);
        assert_eq!(status.failed_operations, $failed, "failed count: {:#?}", status);
        status
    }};
}

/// Assert that a string contains a substring
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {{
        let haystack = $haystack;
        assert!(
            haystack.contains($needle),
            "Expected '{}' to contain '{}'",
            haystack,
            $needle
        );
    }};
}
