//! Process-wide channel for failures that cannot be delivered to a consumer.
//!
//! A failure ends up here when the subscription it belongs to has already terminated or been
//! cancelled, or when a party breaks the signalling protocol. Such failures are never silently
//! dropped and never re-delivered to a consumer that already saw a terminal signal.
//!
//! The default handler logs the failure and continues. A custom handler may be installed for
//! diagnostics with [`set_error_handler`] and removed again with [`reset_error_handler`].

use crate::error::Error;
use std::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering::Acquire, Ordering::Release},
};


struct Handler(Box<dyn Fn(Error) + Send + Sync>);

// the installed handler, or null for the default. swapped atomically so that routing a failure
// never waits. installed handlers are leaked, so one loaded here stays valid for good.
static HANDLER: AtomicPtr<Handler> = AtomicPtr::new(ptr::null_mut());


/// Install a custom handler, replacing any previously installed one.
///
/// Like a global logger, a handler is meant to be installed once or a few times per process: it
/// is never freed, even once replaced.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(Error) + Send + Sync + 'static,
{
    let installed: &'static mut Handler = Box::leak(Box::new(Handler(Box::new(handler))));
    HANDLER.store(installed, Release);
}

/// Go back to the default log-and-continue handler.
pub fn reset_error_handler() {
    HANDLER.store(ptr::null_mut(), Release);
}

/// Route an undeliverable failure to the installed handler.
pub fn on_error(error: Error) {
    let handler = HANDLER.load(Acquire);
    if handler.is_null() {
        error!(%error, "undeliverable failure");
    } else {
        // safety: handlers are leaked upon installation and never freed.
        let handler = unsafe { &*handler };
        (handler.0)(error);
    }
}
