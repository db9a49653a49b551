// SPDX-License-Identifier: GPL-3.0-only

//! Live scanning pipeline
//!
//! ```text
//! PipelineController
//!   -> ConstraintNegotiator       (capabilities / device probe)
//!   -> StreamLifecycleManager     (acquire, wait for surface, attach)
//!   -> FrameSampler               (timer, square crop)
//!   -> DecodeChannel              (worker thread round trip)
//!   -> ScanListener               (result, stream ready, error)
//! ```
//!
//! One run at a time: a configuration change that needs a new stream tears
//! the current run down completely before the next one is negotiated.

pub mod controller;
pub mod decode;
pub mod listener;
pub mod negotiator;
pub mod sampler;
pub mod state;
pub mod stream;

pub use controller::PipelineController;
pub use decode::{
    Chunk, DecodeChannel, DecodeReply, DecodeResponse, Decoder, DecoderFactory, Point, Ticket,
    decoder_factory,
};
pub use listener::{ChannelListener, PipelineEvent, ScanListener};
pub use negotiator::{ConstraintNegotiator, Negotiation};
pub use sampler::{Capture, CropGeometry, FrameSampler, PixelBuffer};
pub use state::{PipelineSnapshot, PipelineState, RunToken, SamplingPhase};
pub use stream::{ActiveStream, StreamLifecycleManager, StreamReady, SurfaceWait};
