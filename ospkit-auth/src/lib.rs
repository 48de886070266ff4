// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SPAKE2 password authentication.
//!
//! Two roles bind a QUIC connection to an out-of-band PIN: the
//! [`AuthenticationPresenter`] shows the PIN, the [`AuthenticationConsumer`]
//! lets the user enter it. Both derive their private scalar from the peer's
//! agent fingerprint (the `fp=` TXT record), exchange P-256 public values and
//! prove possession of `SHA-512(ECDH || password)`.
//!
//! Message flow:
//!
//! ```text
//! Presenter                         Consumer
//!   | Handshake(NeedsPresentation)  → |
//!   | ←       Handshake(Input)        |
//!   | Confirmation(shared_key)      → |
//!   | ←  AuthStatus(Authenticated | ProofInvalid)
//! ```

pub mod base;
pub mod consumer;
pub mod crypto;
pub mod presenter;

pub use base::{AuthDelegate, AuthenticationData, SharedDelegate};
pub use consumer::AuthenticationConsumer;
pub use crypto::{
    compute_private_key, compute_public_value, compute_shared_key, SHARED_KEY_LEN,
};
pub use presenter::AuthenticationPresenter;
