//! Pure calculation functions for output dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Output size used when a request names neither width nor height.
pub const DEFAULT_DIMENSIONS: (u32, u32) = (100, 100);

/// Calculate the output dimensions for a resize request.
///
/// # Arguments
/// * `original` - Source image dimensions (width, height)
/// * `requested` - Requested (width, height); `0` means "not given"
/// * `max` - Configured (max_width, max_height)
///
/// # Rules
/// 1. Requested values are clamped to the configured maximum.
/// 2. Both zero → [`DEFAULT_DIMENSIONS`].
/// 3. Exactly one zero → derived from the source aspect ratio, rounded,
///    at least 1, and clamped to its own maximum.
/// 4. Both given → used as-is (the image is stretched to fit).
///
/// # Examples
/// ```
/// # use thumbserve::imaging::calculate_target_dimensions;
/// // 400x300 source, width 200 requested → height follows the aspect ratio
/// assert_eq!(calculate_target_dimensions((400, 300), (200, 0), (1500, 1500)), (200, 150));
/// ```
pub fn calculate_target_dimensions(
    original: (u32, u32),
    requested: (u32, u32),
    max: (u32, u32),
) -> (u32, u32) {
    let (orig_w, orig_h) = (original.0.max(1), original.1.max(1));
    let (max_w, max_h) = max;
    let w = requested.0.min(max_w);
    let h = requested.1.min(max_h);

    match (w, h) {
        (0, 0) => DEFAULT_DIMENSIONS,
        (w, 0) => {
            let derived = (w as f64 * orig_h as f64 / orig_w as f64).round() as u32;
            (w, derived.clamp(1, max_h.max(1)))
        }
        (0, h) => {
            let derived = (h as f64 * orig_w as f64 / orig_h as f64).round() as u32;
            (derived.clamp(1, max_w.max(1)), h)
        }
        (w, h) => (w, h),
    }
}
