//! Planning for the order-lifecycle stages.
//!
//! Each planner is a pure function from in-cycle state to a list of intents;
//! the pipeline driver performs the broker/store calls. Keeping the decision
//! logic free of I/O is what makes the stage semantics testable row by row.

use recon_api::{
    FairPriceSource, LegKind, LegRef, LegStatus, Order, OrderSide, OrderSpec, Position,
    RegenerationPolicy,
};
use uuid::Uuid;

/// A protective (SL/TP) order that should exist at the broker but doesn't.
#[derive(Debug, Clone)]
pub struct PlannedPlacement {
    pub order_id: Uuid,
    pub kind: LegKind,
    pub spec: OrderSpec,
}

/// A working broker order whose price should be moved.
#[derive(Debug, Clone)]
pub struct PlannedModification {
    pub order_id: Uuid,
    pub kind: LegKind,
    pub broker_id: String,
    pub spec: OrderSpec,
}

fn leg_spec(order: &Order, kind: LegKind, price: f64, quantity: f64, trigger: Option<f64>) -> OrderSpec {
    // Protective legs close the position, so they face the other way.
    let side = match kind {
        LegKind::Entry => order.side(),
        LegKind::StopLoss | LegKind::TakeProfit => order.side().opposite(),
    };
    OrderSpec {
        external_id: Uuid::new_v4(),
        instrument: order.instrument().clone(),
        side,
        kind,
        price,
        quantity,
        stop_trigger: trigger,
        strategy: order.strategy().to_string(),
    }
}

/// Stage 4: protective orders for filled entries whose SL/TP legs were
/// never placed, limited to instruments the broker still holds.
pub fn protective_placements(orders: &[Order], positions: &[Position]) -> Vec<PlannedPlacement> {
    let mut planned = Vec::new();

    for order in orders {
        if !order.protective_legs_meaningful() {
            continue;
        }
        let held = positions
            .iter()
            .any(|p| p.instrument == *order.instrument() && p.quantity != 0.0);
        if !held {
            continue;
        }

        for leg in [order.stop_loss.as_ref(), order.take_profit.as_ref()]
            .into_iter()
            .flatten()
        {
            if leg.status == LegStatus::Pending && leg.broker_id.is_none() {
                planned.push(PlannedPlacement {
                    order_id: order.id(),
                    kind: leg.kind,
                    spec: leg_spec(
                        order,
                        leg.kind,
                        leg.price,
                        order.entry.filled_quantity,
                        leg.stop_trigger,
                    ),
                });
            }
        }
    }

    planned
}

/// Stage 5 trigger: the buy-side fair price has crossed the entry stop.
fn entry_trigger_met(side: OrderSide, fair_buy: f64, trigger: f64) -> bool {
    match side {
        OrderSide::Buy => fair_buy >= trigger,
        OrderSide::Sell => fair_buy <= trigger,
    }
}

/// Stage 6 trigger: the sell-side fair price has crossed the stop-loss stop.
fn stop_trigger_met(side: OrderSide, fair_sell: f64, trigger: f64) -> bool {
    match side {
        // A long's stop-loss is a sell below market.
        OrderSide::Buy => fair_sell <= trigger,
        OrderSide::Sell => fair_sell >= trigger,
    }
}

/// Stage 5: re-price working entry legs whose stop trigger the buy-side
/// fair price has crossed. The leg converts to a limit at its trigger.
pub fn entry_modifications(
    orders: &[Order],
    prices: &dyn FairPriceSource,
) -> Vec<PlannedModification> {
    let mut planned = Vec::new();

    for order in orders {
        let leg = &order.entry;
        let (Some(trigger), Some(broker_id)) = (leg.stop_trigger, leg.broker_id.as_ref()) else {
            continue;
        };
        if !leg.status.is_working() {
            continue;
        }
        let Some(fair) = prices.fair_price(order.instrument()) else {
            continue;
        };
        if entry_trigger_met(order.side(), fair.buy, trigger) {
            planned.push(PlannedModification {
                order_id: order.id(),
                kind: LegKind::Entry,
                broker_id: broker_id.clone(),
                spec: leg_spec(order, LegKind::Entry, trigger, leg.quantity, None),
            });
        }
    }

    planned
}

/// Stage 6: re-price working stop-loss legs whose trigger the sell-side
/// fair price has crossed, moving them to the current sell-side fair.
pub fn stop_modifications(
    orders: &[Order],
    prices: &dyn FairPriceSource,
) -> Vec<PlannedModification> {
    let mut planned = Vec::new();

    for order in orders {
        let Some(leg) = order.stop_loss.as_ref() else {
            continue;
        };
        let (Some(trigger), Some(broker_id)) = (leg.stop_trigger, leg.broker_id.as_ref()) else {
            continue;
        };
        if !leg.status.is_working() || !order.protective_legs_meaningful() {
            continue;
        }
        let Some(fair) = prices.fair_price(order.instrument()) else {
            continue;
        };
        if stop_trigger_met(order.side(), fair.sell, trigger) {
            planned.push(PlannedModification {
                order_id: order.id(),
                kind: LegKind::StopLoss,
                broker_id: broker_id.clone(),
                spec: leg_spec(order, LegKind::StopLoss, fair.sell, leg.quantity, Some(fair.sell)),
            });
        }
    }

    planned
}

/// Stage 7: every leg sitting in terminal Rejected status.
pub fn rejected_leg_refs(orders: &[Order]) -> Vec<LegRef> {
    let mut refs = Vec::new();
    for order in orders {
        for leg in order.legs() {
            if leg.status == LegStatus::Rejected {
                refs.push(LegRef {
                    order_id: order.id(),
                    kind: leg.kind,
                });
            }
        }
    }
    refs
}

/// Orders whose entry leg was rejected; candidates for regeneration.
pub fn rejected_entry_orders(orders: &[Order]) -> Vec<Order> {
    orders
        .iter()
        .filter(|o| o.entry.status == LegStatus::Rejected)
        .cloned()
        .collect()
}

/// Stage 8: fresh entry specs for rejected entries the tenant's policy
/// allows. An empty allowlist yields nothing.
pub fn regeneration_specs(rejected: &[Order], policy: &RegenerationPolicy) -> Vec<OrderSpec> {
    rejected
        .iter()
        .filter(|o| policy.allows(o.strategy()))
        .map(|o| {
            leg_spec(
                o,
                LegKind::Entry,
                o.entry.price,
                o.entry.quantity,
                o.entry.stop_trigger,
            )
        })
        .collect()
}
