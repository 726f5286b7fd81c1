//! FIFO matching of entry fills against exit fills.
//!
//! Pure and deterministic: no I/O, no hidden state. Re-running on the same
//! fill set yields identical output, which is what lets the pipeline
//! recompute the full match set every cycle instead of patching it.

use recon_api::{Fill, FillRef, Instrument, OrderSide, PnlMatch};

/// Matcher output for one (account, instrument) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub matches: Vec<PnlMatch>,
    /// Entry quantity left unconsumed after all exits were processed.
    pub open_quantity: f64,
    /// Exit quantity that had no entry inventory to match against.
    pub overfill_quantity: f64,
    pub realized_total: f64,
    pub unrealized_total: f64,
    /// Inconsistencies observed while matching. Reported, never dropped.
    pub warnings: Vec<String>,
}

fn fill_ref(fill: &Fill) -> FillRef {
    FillRef {
        sequence: fill.sequence.clone(),
        price: fill.price,
        timestamp: fill.timestamp,
    }
}

/// Sort chronologically; ties on timestamp break by broker sequence id so
/// the ordering is stable across runs.
fn sort_chronological(fills: &mut [Fill]) {
    fills.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

/// Matches exit fills against entry fills in FIFO order for one instrument.
///
/// `side` is the opening direction of the round-trip: `Buy` means entries
/// bought and exits sold (realized = qty × (exit − entry)), `Sell` the
/// mirror image. Residual entry inventory is valued against `fair_price`
/// when one is supplied.
pub fn match_fills(
    instrument: &Instrument,
    side: OrderSide,
    entries: &[Fill],
    exits: &[Fill],
    fair_price: Option<f64>,
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    let mut entries: Vec<Fill> = entries.to_vec();
    let mut exits: Vec<Fill> = exits.to_vec();
    sort_chronological(&mut entries);
    sort_chronological(&mut exits);

    if entries.is_empty() && !exits.is_empty() {
        let total: f64 = exits.iter().map(|f| f.quantity).sum();
        outcome.overfill_quantity = total;
        outcome.warnings.push(format!(
            "{}: {} exit quantity with no entry fills",
            instrument, total
        ));
        return outcome;
    }

    let sign = side.sign();

    // Head of the entry queue plus how much of it is still unmatched.
    let mut head = 0usize;
    let mut head_remaining = entries.first().map(|f| f.quantity).unwrap_or(0.0);

    for exit in &exits {
        let mut exit_remaining = exit.quantity;

        while exit_remaining > 0.0 && head < entries.len() {
            let entry = &entries[head];
            let matched = exit_remaining.min(head_remaining);

            let realized = matched * (exit.price - entry.price) * sign;
            outcome.realized_total += realized;
            outcome.matches.push(PnlMatch::closed(
                instrument.clone(),
                fill_ref(entry),
                fill_ref(exit),
                matched,
                realized,
            ));

            exit_remaining -= matched;
            head_remaining -= matched;

            if head_remaining <= 0.0 {
                head += 1;
                head_remaining = entries.get(head).map(|f| f.quantity).unwrap_or(0.0);
            }
        }

        if exit_remaining > 0.0 {
            // More exit quantity than entry inventory: flag, don't drop.
            outcome.overfill_quantity += exit_remaining;
            outcome.warnings.push(format!(
                "{}: exit {} overfills entries by {}",
                instrument, exit.sequence, exit_remaining
            ));
        }
    }

    // Whatever is left in the queue is open position.
    while head < entries.len() {
        let entry = &entries[head];
        let open = head_remaining;
        let unrealized = fair_price.map(|fair| open * (fair - entry.price) * sign);
        if let Some(u) = unrealized {
            outcome.unrealized_total += u;
        }
        outcome.open_quantity += open;
        outcome.matches.push(PnlMatch::open(
            instrument.clone(),
            fill_ref(entry),
            open,
            unrealized,
        ));

        head += 1;
        head_remaining = entries.get(head).map(|f| f.quantity).unwrap_or(0.0);
    }

    outcome
}
