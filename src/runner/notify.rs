//! 令牌变化通知：按库所注册的监听器，在标识变化的同一调用中同步投递。
use std::collections::HashMap;

use crate::net::ids::PlaceId;
use crate::net::structure::TokenCounts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChange {
    pub place: String,
    /// 变化后该库所完整的颜色到数量映射
    pub counts: TokenCounts,
}

pub trait TokenListener {
    fn token_changed(&mut self, change: &TokenChange);
}

impl<F> TokenListener for F
where
    F: FnMut(&TokenChange),
{
    fn token_changed(&mut self, change: &TokenChange) {
        self(change)
    }
}

/// Logs every change it receives at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl TokenListener for LogListener {
    fn token_changed(&mut self, change: &TokenChange) {
        log::info!("tokens of `{}` changed: {:?}", change.place, change.counts);
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<PlaceId, Vec<Box<dyn TokenListener>>>,
}

impl ListenerRegistry {
    pub fn register(&mut self, place: PlaceId, listener: Box<dyn TokenListener>) {
        self.listeners.entry(place).or_default().push(listener);
    }

    pub fn is_listening(&self, place: PlaceId) -> bool {
        self.listeners.get(&place).is_some_and(|list| !list.is_empty())
    }

    /// Delivers to the place's listeners in registration order.
    pub fn publish(&mut self, place: PlaceId, change: &TokenChange) {
        if let Some(list) = self.listeners.get_mut(&place) {
            for listener in list.iter_mut() {
                listener.token_changed(change);
            }
        }
    }
}
