// SPDX-License-Identifier: MPL-2.0

//! Frame analysis run by the decode worker
//!
//! Currently implements QR code decoding.

pub mod qr_detector;

pub use qr_detector::QrDecoder;
