use std::panic;
use std::thread;

use backtrace::Backtrace;

/// Routes panics from every thread, capture threads included, through the
/// logger.
pub fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let payload = payload
            .downcast_ref::<&str>()
            .map(|v| (*v).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();

        let location = panic_info
            .location()
            .map(|location| {
                format!(
                    "{}:{}:{}",
                    location.file(),
                    location.line(),
                    location.column()
                )
            })
            .unwrap_or_default();

        let thread = thread::current();
        let name = thread.name().unwrap_or("<unnamed>");

        log::error!("thread '{}' panicked at '{}', {}", name, payload, location);
        log::error!("{:?}", Backtrace::new());
    }));
}
