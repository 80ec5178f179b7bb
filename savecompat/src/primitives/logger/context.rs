use std::cell::RefCell;

thread_local! {
    static LOG_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// A scope guard that sets a logging context and restores the previous one when dropped.
///
/// Contexts nest: a registry call made from inside a runner call logs with the
/// registry's prefix and the runner's prefix comes back afterwards.
///
/// # Examples
///
/// ```rust
/// use savecompat::primitives::logger::{get_context, LogContext};
///
/// {
///     let _ctx = LogContext::new("MigrationRunner");
///     assert_eq!(get_context().as_deref(), Some("[MigrationRunner]"));
/// }
/// assert_eq!(get_context(), None);
/// ```
pub struct LogContext {
    previous: Option<String>,
}

impl LogContext {
    /// Creates a new logging context scope.
    #[must_use]
    pub fn new(module: &str) -> Self {
        let previous = LOG_CONTEXT.with(|ctx| ctx.replace(Some(format!("[{module}]"))));
        Self { previous }
    }
}

impl Drop for LogContext {
    fn drop(&mut self) {
        LOG_CONTEXT.with(|ctx| {
            (*ctx.borrow_mut()).clone_from(&self.previous);
        });
    }
}

/// Gets the current logging context, if any.
#[must_use]
pub fn get_context() -> Option<String> {
    LOG_CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Runs a block with a scoped logging context.
///
/// # Examples
///
/// ```rust
/// use savecompat::with_log_context;
///
/// let value = with_log_context!("MigrationLedger" => {
///     savecompat::info!("prefixed with [MigrationLedger]");
///     42
/// });
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! with_log_context {
    ($module:expr => $block:block) => {{
        let _ctx = $crate::primitives::logger::LogContext::new($module);
        $block
    }};
}
