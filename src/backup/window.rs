use futures::future::BoxFuture;

/// Work to run once, when the user asks to close the main window.
pub type CloseHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A window that can hold its own teardown until a hook has finished.
///
/// Implementations run the hook at most once, on the first close request,
/// and close the window once the hook's future resolves.
pub trait CloseSignal: Send + Sync {
    fn on_close_requested(&self, hook: CloseHook);
}

#[cfg(feature = "tauri")]
mod tauri_window {
    use std::sync::Mutex;

    use tauri::{Runtime, Window, WindowEvent};

    use super::{CloseHook, CloseSignal};

    impl<R: Runtime> CloseSignal for Window<R> {
        fn on_close_requested(&self, hook: CloseHook) {
            let pending = Mutex::new(Some(hook));
            let window = self.clone();
            self.on_window_event(move |event| {
                let WindowEvent::CloseRequested { api, .. } = event else {
                    return;
                };
                let hook = pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                let Some(hook) = hook else {
                    return;
                };
                api.prevent_close();
                let window = window.clone();
                tauri::async_runtime::spawn(async move {
                    hook().await;
                    if let Err(err) = window.destroy() {
                        tracing::warn!(target: "carelink", error = %err, "window_destroy_failed");
                    }
                });
            });
        }
    }
}
