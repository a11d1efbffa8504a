//! Float math shims shared by the planner and the trapezoid generator.
//!
//! `std` builds use the library intrinsics; `no_std` builds route through
//! `libm`, matching the usual firmware configuration.

#[cfg(feature = "std")]
mod imp {
    #[inline]
    pub fn sqrtf(x: f32) -> f32 {
        x.sqrt()
    }

    #[inline]
    pub fn sqrt(x: f64) -> f64 {
        x.sqrt()
    }

    #[inline]
    pub fn ceilf(x: f32) -> f32 {
        x.ceil()
    }

    #[inline]
    pub fn floorf(x: f32) -> f32 {
        x.floor()
    }

    #[inline]
    pub fn fabsf(x: f32) -> f32 {
        x.abs()
    }

    #[inline]
    pub fn roundf(x: f32) -> f32 {
        x.round()
    }
}

#[cfg(all(not(feature = "std"), feature = "libm"))]
mod imp {
    pub use libm::{ceilf, fabsf, floorf, roundf, sqrt, sqrtf};
}

#[cfg(all(not(feature = "std"), not(feature = "libm")))]
compile_error!("motion requires either the `std` or the `libm` feature");

pub(crate) use imp::*;

/// Round-to-nearest conversion into the integer step domain.
#[inline]
pub(crate) fn lroundf(x: f32) -> i32 {
    roundf(x) as i32
}
