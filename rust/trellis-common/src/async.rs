use std::future::Future;

/// Schedule a future with the local executor and return immediately. The
/// future runs to completion on its own; callers that need its output should
/// hand it a channel.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}

/// Schedule a future with the local executor and return immediately. The
/// future runs to completion on its own; callers that need its output should
/// hand it a channel.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}
