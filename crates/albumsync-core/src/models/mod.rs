//! Data models for album entities.
//!
//! This module contains the data structures shared by the sync engine,
//! the API client and the upload pipeline:
//!
//! - `Challenge`: a prompt within an album, as sent by the backend
//! - `AlbumIdentity`: which album a session is looking at (id or share token)
//! - `Credential`: what authenticated requests carry

pub mod album;
pub mod challenge;

pub use album::{AlbumIdentity, Credential, GUEST_USER_SENTINEL, PUBLIC_ALBUM_SENTINEL};
pub use challenge::Challenge;
