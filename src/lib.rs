//! `dragtree` - drag-race staging, auto-start and light-tree controller
//!
//! The light tree ([`tree`]) owns the bulbs, the armed/activated handshake
//! and the amber/green sequence. The auto-start controller ([`autostart`])
//! watches both lanes' beams, takes sequencing authority under the
//! three-light rule, and releases the tree after a randomized delay. The
//! [`adapter`] wires the two together behind a raw beam interface.

pub mod adapter;
pub mod autostart;
pub mod cli;
pub mod config;
pub mod error;
pub mod lane;
pub mod observability;
pub mod tree;
