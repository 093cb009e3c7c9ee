use crate::structure::Value;

/// Lifecycle callbacks of one downlink; every method defaults to a no-op.
///
/// For list downlinks the `key` of `did_update` and `did_remove` is the
/// item index.
pub trait DownlinkObserver {
    /// Raw body of every `@event`, before it is applied.
    fn on_event(&mut self, _body: &Value) {}
    fn did_link(&mut self) {}
    fn did_sync(&mut self) {}
    fn did_unlink(&mut self) {}
    fn did_close(&mut self) {}
    fn did_set(&mut self, _value: &Value, _old: &Value) {}
    fn did_update(&mut self, _key: &Value, _value: &Value, _old: &Value) {}
    fn did_remove(&mut self, _key: &Value, _old: &Value) {}
}

#[derive(Default)]
pub(crate) struct Observers(Vec<Box<dyn DownlinkObserver>>);

impl Observers {
    pub(crate) fn push(&mut self, observer: Box<dyn DownlinkObserver>) {
        self.0.push(observer);
    }

    pub(crate) fn each(&mut self, mut f: impl FnMut(&mut dyn DownlinkObserver)) {
        for observer in self.0.iter_mut() {
            f(observer.as_mut());
        }
    }
}
