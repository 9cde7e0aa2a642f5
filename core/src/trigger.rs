/// re-exports the triggered crate as well as the
/// [`SingleTrigger`] wrapper
pub use triggered::*;

/// Wrapper combining a [`Trigger`] and its [`Listener`]. The listener can be
/// cloned and awaited by any number of tasks; the trigger fires exactly once.
#[derive(Debug, Clone)]
pub struct SingleTrigger {
    pub trigger: Trigger,
    pub listener: Listener,
}

impl SingleTrigger {
    pub fn new() -> SingleTrigger {
        let (trigger, listener) = triggered::trigger();
        SingleTrigger { trigger, listener }
    }
}

impl Default for SingleTrigger {
    fn default() -> Self {
        Self::new()
    }
}
