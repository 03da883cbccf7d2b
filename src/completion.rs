/// A callback that is invoked exactly once.
///
/// If the completion is dropped without being completed (the request was rejected, timed out or
/// the worker stopped), the callback receives the fallback value instead.
pub(crate) struct Completion<T> {
    inner: Option<(Box<dyn FnOnce(T) + Send>, T)>,
}

impl<T> Completion<T> {
    pub fn new(callback: impl FnOnce(T) + Send + 'static, fallback: T) -> Self {
        Completion {
            inner: Some((Box::new(callback), fallback)),
        }
    }

    pub fn complete(mut self, value: T) {
        if let Some((callback, _fallback)) = self.inner.take() {
            callback(value);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some((callback, fallback)) = self.inner.take() {
            callback(fallback);
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.inner.is_some())
            .finish()
    }
}
