//! Typed publish/subscribe event bus.
//!
//! Fan-out is synchronous: `publish` invokes every matching subscriber
//! before returning, in descending priority order (subscription order breaks
//! ties). Within one run, publication order therefore equals delivery order,
//! which is what makes replay results reproducible.

use serde::{Deserialize, Serialize};

use crate::events::BusMessage;

/// Category of a bus message, used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    GameState,
    ObservedTrade,
    Settlement,
    Risk,
}

impl BusMessage {
    /// The category this message belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            BusMessage::GameState(_) => EventCategory::GameState,
            BusMessage::ObservedTrade(_) => EventCategory::ObservedTrade,
            BusMessage::Settlement(_) => EventCategory::Settlement,
            BusMessage::LimitBreach(_) => EventCategory::Risk,
        }
    }
}

/// Options controlling what a subscriber receives and when.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Categories to receive; `None` means all.
    pub categories: Option<Vec<EventCategory>>,
    /// Higher priority subscribers are invoked first.
    pub priority: i32,
}

impl SubscribeOptions {
    /// Subscribe to every category at default priority.
    pub fn all() -> Self {
        Self::default()
    }

    /// Subscribe to a single category at default priority.
    pub fn category(category: EventCategory) -> Self {
        Self {
            categories: Some(vec![category]),
            priority: 0,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn matches(&self, category: EventCategory) -> bool {
        match &self.categories {
            Some(cats) => cats.contains(&category),
            None => true,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], usable for unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type Handler = Box<dyn FnMut(&BusMessage) + Send>;

struct Subscriber {
    id: SubscriberId,
    options: SubscribeOptions,
    handler: Handler,
}

/// Typed event bus with category/priority-filtered synchronous fan-out.
///
/// One bus per trading context: the live process holds one, each replay run
/// constructs its own, so runs never observe each other's events.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    published: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Subscribers with higher priority run first on
    /// each publish; equal priorities run in subscription order.
    pub fn subscribe(
        &mut self,
        options: SubscribeOptions,
        handler: impl FnMut(&BusMessage) + Send + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            options,
            handler: Box::new(handler),
        });
        // Stable sort keeps subscription order within equal priorities.
        self.subscribers
            .sort_by_key(|s| std::cmp::Reverse(s.options.priority));
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.subscribers.retain(|s| s.id != id);
    }

    /// Deliver a message to every matching subscriber, synchronously.
    pub fn publish(&mut self, message: &BusMessage) {
        self.published += 1;
        let category = message.category();
        for sub in self.subscribers.iter_mut() {
            if sub.options.matches(category) {
                (sub.handler)(message);
            }
        }
    }

    /// Total messages published on this bus.
    pub fn published_count(&self) -> u64 {
        self.published
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .field("published", &self.published)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ExposureView, LimitBreach, TradeIntent};
    use crate::types::{Currency, GameId, GamePhase, GameStateEvent, StrategyId};
    use std::sync::{Arc, Mutex};

    fn game_state_msg(tick: u32) -> BusMessage {
        BusMessage::GameState(GameStateEvent {
            game_id: GameId::new("g1"),
            tick,
            price: 1.0,
            phase: GamePhase::Active,
            timestamp: tick as i64,
        })
    }

    fn breach_msg() -> BusMessage {
        BusMessage::LimitBreach(LimitBreach {
            limit: "max_buy_amount".to_string(),
            intent: TradeIntent::buy(
                StrategyId::new("s1"),
                Currency::Primary,
                5.0,
                GameId::new("g1"),
                1,
            ),
            exposure: ExposureView {
                capital_at_risk: 0.0,
                open_trades_count: 0,
                total_capital_at_risk: 0.0,
                total_open_trades: 0,
            },
            timestamp: 0,
        })
    }

    #[test]
    fn test_category_filter() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        bus.subscribe(SubscribeOptions::category(EventCategory::Risk), move |m| {
            seen_clone.lock().unwrap().push(m.category());
        });

        bus.publish(&game_state_msg(1));
        bus.publish(&breach_msg());
        bus.publish(&game_state_msg(2));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[EventCategory::Risk]);
    }

    #[test]
    fn test_priority_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.subscribe(SubscribeOptions::all().with_priority(0), move |_| {
            o.lock().unwrap().push("low");
        });
        let o = order.clone();
        bus.subscribe(SubscribeOptions::all().with_priority(10), move |_| {
            o.lock().unwrap().push("high");
        });

        bus.publish(&game_state_msg(1));

        assert_eq!(order.lock().unwrap().as_slice(), &["high", "low"]);
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));

        let c = count.clone();
        let id = bus.subscribe(SubscribeOptions::all(), move |_| {
            *c.lock().unwrap() += 1;
        });

        bus.publish(&game_state_msg(1));
        bus.unsubscribe(id);
        bus.publish(&game_state_msg(2));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.published_count(), 2);
    }
}
