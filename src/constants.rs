// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Default edge length of the square buffer handed to the decoder
pub const DEFAULT_RESOLUTION_PX: u32 = 600;

/// Largest accepted edge length of the decoder buffer
pub const MAX_RESOLUTION_PX: u32 = 4096;

/// Default delay between two samples
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 500;

/// Frame rate hints used when the runtime supports frame rate constraints
pub mod frame_rate {
    /// Preferred capture frame rate
    pub const IDEAL: u32 = 25;
    /// Lowest acceptable capture frame rate
    pub const MIN: u32 = 10;
}

/// Render surface availability polling (fallback when no notification arrives)
pub mod surface {
    use std::time::Duration;

    /// Fixed delay between two availability checks
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
    /// Checks before giving up on the surface ever showing up
    pub const MAX_POLL_ATTEMPTS: u32 = 50;
}

/// Device label heuristics for facing selection
pub mod facing_labels {
    /// Substrings identifying a back (environment) camera
    pub const BACK: &[&str] = &["rear", "back", "environment"];
    /// Substrings identifying a front (user) camera
    pub const FRONT: &[&str] = &["front", "user", "face"];
}

/// V4L2 capture settings
pub mod v4l2 {
    /// Number of mmap buffers queued on the device
    pub const BUFFER_COUNT: u32 = 4;
    /// Capture size requested when constraints carry no size hint
    pub const DEFAULT_WIDTH: u32 = 1280;
    pub const DEFAULT_HEIGHT: u32 = 720;
    /// Pixel formats we can convert, in order of preference
    pub const PREFERRED_FOURCCS: [&[u8; 4]; 2] = [b"YUYV", b"MJPG"];
    /// Longest wait for one dequeue before the loop re-checks its stop flag
    pub const DEQUEUE_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(250);
}

/// Sleep after a failed frame dequeue before trying again
pub const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Name of the decode worker thread
pub const DECODE_WORKER_THREAD: &str = "qr-decode-worker";

/// Directory name under the user config dir
pub const CONFIG_DIR_NAME: &str = "qr-reader";

/// Settings file name
pub const CONFIG_FILE_NAME: &str = "config.json";
