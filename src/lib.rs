#![forbid(unsafe_code)]

//! Public entry point for the anistream crate.
//!
//! The catalog core (video source resolution, episode lists, watch history,
//! related titles) is plain synchronous code over injected stores; the
//! `backend` binary adds upload handling and the `catalog` binary exposes the
//! core over a local document store.

pub mod catalog;
pub mod config;
pub mod episodes;
pub mod error;
pub mod history;
pub mod player;
pub mod related;
pub mod store;
pub mod upload;
pub mod video_source;
