use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

/// What a listener tells the dispatcher after it ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<P> {
    /// Nothing to report, invoke the next listener.
    Continue,
    /// Do not invoke any further listener for this dispatch.
    Stop,
    /// The listener performed the operation itself. `P` replaces the default
    /// work of the caller. Later listeners still run and may override it.
    Handled(P),
}

impl<P> Outcome<P> {
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled(_))
    }
}

/// Boxed future returned by a [`Listener`].
pub type ListenerFuture<P, E> = Pin<Box<dyn Future<Output = Result<Outcome<P>, E>> + Send>>;

/// A registered listener. Registrations are compared by pointer, so keep the
/// `Arc` around if you intend to remove it later.
pub type Listener<C, P, E> = Arc<dyn Fn(C) -> ListenerFuture<P, E> + Send + Sync>;

/// Wrap an async closure into a [`Listener`].
pub fn listener<C, P, E, F, Fut>(f: F) -> Listener<C, P, E>
where
    C: 'static,
    P: 'static,
    E: 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome<P>, E>> + Send + 'static,
{
    Arc::new(move |ctx: C| -> ListenerFuture<P, E> { Box::pin(f(ctx)) })
}

/// The state of a finished dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched<P> {
    /// At least one listener returned [`Outcome::Handled`].
    pub completed: bool,
    /// Payload of the last `Handled` outcome.
    pub result: Option<P>,
    /// Number of listeners that were invoked.
    pub invoked: usize,
}

impl<P> Dispatched<P> {
    fn new() -> Self {
        Self {
            completed: false,
            result: None,
            invoked: 0,
        }
    }

    /// The result if the dispatch was completed by a listener.
    pub fn into_result(self) -> Option<P> {
        if self.completed {
            self.result
        } else {
            None
        }
    }
}

/// Listener registry keyed by event name.
///
/// Listeners for one name are invoked in registration order, one after the
/// other, each receiving its own clone of the dispatch context. The registry
/// is never locked while a listener runs, so listeners may register or remove
/// listeners themselves.
pub struct EventHub<K, C, P, E> {
    listeners: DashMap<K, Vec<Listener<C, P, E>>>,
}

impl<K, C, P, E> Default for EventHub<K, C, P, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }
}

impl<K, C, P, E> EventHub<K, C, P, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    C: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, name: K, listener: Listener<C, P, E>) {
        self.listeners.entry(name).or_default().push(listener);
    }

    /// Remove one registration of `listener` under `name`.
    ///
    /// Returns `false` if that listener was not registered for `name`.
    pub fn remove_listener(&self, name: &K, listener: &Listener<C, P, E>) -> bool {
        let Some(mut list) = self.listeners.get_mut(name) else {
            return false;
        };
        match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn has_listeners(&self, name: &K) -> bool {
        self.listeners.get(name).is_some_and(|l| !l.is_empty())
    }

    pub fn listener_count(&self, name: &K) -> usize {
        self.listeners.get(name).map_or(0, |l| l.len())
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// Dispatch `name`.
    ///
    /// Returns `Ok(None)` without doing anything when nobody listens to
    /// `name`. Otherwise every registered listener runs, followed by `hook`
    /// (the subject's own handler) when one is given, until a listener
    /// returns [`Outcome::Stop`]. A listener error aborts the dispatch and is
    /// returned as is.
    pub async fn raise(
        &self,
        name: &K,
        ctx: C,
        hook: Option<Listener<C, P, E>>,
    ) -> Result<Option<Dispatched<P>>, E> {
        let mut chain = match self.listeners.get(name) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return Ok(None),
        };
        chain.extend(hook);

        let mut state = Dispatched::new();
        for listener in chain {
            state.invoked += 1;
            match listener(ctx.clone()).await? {
                Outcome::Continue => {}
                Outcome::Handled(result) => {
                    state.completed = true;
                    state.result = Some(result);
                }
                Outcome::Stop => {
                    tracing::trace!(event = ?name, invoked = state.invoked, "propagation stopped");
                    break;
                }
            }
        }
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Hub = EventHub<&'static str, u32, u32, String>;

    #[test]
    fn test_remove_only_one_registration() {
        let hub = Hub::new();
        let l: Listener<u32, u32, String> = listener(|_| async { Ok(Outcome::Continue) });
        hub.add_listener("save", l.clone());
        hub.add_listener("save", l.clone());
        assert!(hub.remove_listener(&"save", &l));
        assert_eq!(hub.listener_count(&"save"), 1);
    }

    #[test]
    fn test_remove_unknown_listener() {
        let hub = Hub::new();
        let a: Listener<u32, u32, String> = listener(|_| async { Ok(Outcome::Continue) });
        let b: Listener<u32, u32, String> = listener(|_| async { Ok(Outcome::Continue) });
        hub.add_listener("save", a);
        assert!(!hub.remove_listener(&"save", &b));
        assert!(!hub.remove_listener(&"find", &b));
    }

    #[test]
    fn test_dispatched_into_result() {
        let done = Dispatched {
            completed: true,
            result: Some(3),
            invoked: 1,
        };
        assert_eq!(done.into_result(), Some(3));
        let idle: Dispatched<u32> = Dispatched::new();
        assert_eq!(idle.into_result(), None);
    }
}
