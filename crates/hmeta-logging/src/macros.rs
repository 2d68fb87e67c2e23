//! ---
//! hmeta_section: "03-persistence-logging"
//! hmeta_subsection: "module"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Structured logging context and macros."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
/// Emit a log event at the given level enriched with a [`LogContext`](crate::LogContext).
#[doc(hidden)]
#[macro_export]
macro_rules! __hmeta_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            table = ctx.table.unwrap_or(""),
            role = ctx.role.unwrap_or(""),
            superset = ctx.superset.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with table/role context.
#[macro_export]
macro_rules! hmeta_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with table/role context.
#[macro_export]
macro_rules! hmeta_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with table/role context.
#[macro_export]
macro_rules! hmeta_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with table/role context.
#[macro_export]
macro_rules! hmeta_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__hmeta_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
