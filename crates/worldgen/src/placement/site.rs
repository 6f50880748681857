//! Coarse site suitability check. Reads only.

use bevy::math::IVec3;

use crate::error::{PlacementError, SiteRejectReason};
use crate::footprints::FootprintRect;
use crate::host::VoxelHost;
use crate::params::SiteParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteVerdict {
    Accepted { base_y: i32 },
    Rejected(SiteRejectReason),
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    height: i32,
    water: bool,
}

fn sample_axis(min: i32, max: i32, step: i32) -> impl Iterator<Item = i32> {
    let step = step.max(1) as usize;
    let mut coords: Vec<i32> = (min..=max).step_by(step).collect();
    if coords.last() != Some(&max) {
        coords.push(max);
    }
    coords.into_iter()
}

/// Median of the footprint samples, pulled toward the extremes by at most
/// `median_clamp_depth`.
fn clamped_median(heights: &mut [i32], clamp_depth: i32) -> i32 {
    heights.sort_unstable();
    let median = heights[heights.len() / 2];
    let lowest = heights[0];
    let highest = heights[heights.len() - 1];
    let lo = highest - clamp_depth;
    let hi = lowest + clamp_depth;
    if lo <= hi {
        median.max(lo).min(hi)
    } else {
        median
    }
}

pub fn check_site(
    host: &dyn VoxelHost,
    rect: &FootprintRect,
    params: &SiteParams,
) -> Result<SiteVerdict, PlacementError> {
    let mut samples = Vec::new();
    for z in sample_axis(rect.min_z, rect.max_z, params.sample_step) {
        for x in sample_axis(rect.min_x, rect.max_x, params.sample_step) {
            let height = host.surface_height(x, z)?;
            let water = host.block(IVec3::new(x, height, z))?.is_liquid();
            samples.push(Sample { height, water });
        }
    }
    if samples.is_empty() {
        return Ok(SiteVerdict::Rejected(SiteRejectReason::NoSamples));
    }

    let mut heights: Vec<i32> = samples.iter().map(|s| s.height).collect();
    let level = clamped_median(&mut heights, params.median_clamp_depth);

    let (mut cut, mut fill, mut water) = (0usize, 0usize, 0usize);
    for s in &samples {
        if s.water {
            water += 1;
        } else if s.height - level > params.max_cut {
            cut += 1;
        } else if level - s.height > params.max_fill {
            fill += 1;
        }
    }

    let bad = cut + fill + water;
    let fraction = bad as f32 / samples.len() as f32;
    if fraction > params.allowed_bad_fraction {
        let reason = if water >= cut && water >= fill {
            SiteRejectReason::SurfaceWater
        } else if cut >= fill {
            SiteRejectReason::ExcessCut
        } else {
            SiteRejectReason::ExcessFill
        };
        return Ok(SiteVerdict::Rejected(reason));
    }

    Ok(SiteVerdict::Accepted {
        base_y: level - params.foundation_bury,
    })
}
