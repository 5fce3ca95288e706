// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenPlanet.

// OpenPlanet is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenPlanet is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenPlanet.  If not, see <http://www.gnu.org/licenses/>.

//! Side-effect delivery to the host.
//!
//! Hosts install renderers to mirror chain activity into their own
//! world: one callback per applied action, bracketed per block, with
//! inverse callbacks when a reorganization rolls actions back. The
//! engine guarantees the ordering documented on [`Renderer`]; it does
//! not guarantee a delivery thread.

mod delayed;

pub use delayed::DelayedRenderer;

use log::warn;
use planet_types::{
    action::{Action, ActionContext, ActionError, StateDelta},
    block::Block,
};
use std::panic::{self, AssertUnwindSafe};

/// Host callbacks for applied and rolled-back actions.
///
/// For a plain append the engine emits:
///
/// ```text
/// render_block(old_tip, new_tip)
///   render_action / render_action_error   (forward order)
/// render_block_end(old_tip, new_tip)
/// ```
///
/// For a reorganization through `branchpoint`:
///
/// ```text
/// render_reorg(old_tip, new_tip, branchpoint)
/// render_block(old_tip, new_tip)
///   unrender_action / unrender_action_error
///       for blocks (branchpoint, old_tip] descending,
///       actions in reverse evaluation order
///   render_action / render_action_error
///       for blocks (branchpoint, new_tip] ascending,
///       actions in forward evaluation order
/// render_block_end(old_tip, new_tip)
/// render_reorg_end(old_tip, new_tip, branchpoint)
/// ```
///
/// All methods default to no-ops so hosts implement only what they
/// need. A panicking renderer never aborts the append that triggered
/// it; the event is dropped with a warning.
pub trait Renderer<A: Action>: Send + Sync {
    /// A block of events follows. `old_tip` is absent on the first
    /// block of an empty chain.
    fn render_block(&self, old_tip: Option<&Block<A>>, new_tip: &Block<A>) {
        let _ = (old_tip, new_tip);
    }

    /// The block bracket opened by the matching `render_block` closed.
    fn render_block_end(&self, old_tip: Option<&Block<A>>, new_tip: &Block<A>) {
        let _ = (old_tip, new_tip);
    }

    /// A reorganization bracket opens; an unrender+render sequence
    /// follows inside a block bracket.
    fn render_reorg(&self, old_tip: &Block<A>, new_tip: &Block<A>, branchpoint: &Block<A>) {
        let _ = (old_tip, new_tip, branchpoint);
    }

    /// The reorganization bracket closed.
    fn render_reorg_end(&self, old_tip: &Block<A>, new_tip: &Block<A>, branchpoint: &Block<A>) {
        let _ = (old_tip, new_tip, branchpoint);
    }

    /// An action was applied; `next_states` is the block delta right
    /// after it.
    fn render_action(&self, action: &A, context: &ActionContext, next_states: &StateDelta) {
        let _ = (action, context, next_states);
    }

    /// An action failed while being applied.
    fn render_action_error(&self, action: &A, context: &ActionContext, error: &ActionError) {
        let _ = (action, context, error);
    }

    /// An action was rolled back; `next_states` is the delta it had
    /// produced when applied.
    fn unrender_action(&self, action: &A, context: &ActionContext, next_states: &StateDelta) {
        let _ = (action, context, next_states);
    }

    /// A failed action was rolled back.
    fn unrender_action_error(&self, action: &A, context: &ActionContext, error: &ActionError) {
        let _ = (action, context, error);
    }
}

/// Invoke one renderer callback, absorbing panics.
///
/// Renderer failures must never poison an append that already
/// committed, so the event is dropped and the loss logged.
pub(crate) fn emit<F: FnOnce()>(event: &'static str, callback: F) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(target: "render", "a renderer panicked during {event}; the event was lost");
    }
}
