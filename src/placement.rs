//! Spatial placement engine
//!
//! Picks a coordinate for a newly assigned task inside a zone so
//! that it does not crowd the zone anchor or any already-placed
//! task.
//!
//! ALGORITHM:
//! - Candidates lie on concentric rings around the anchor. Ring k
//!   has radius `BASE_RADIUS + k * RING_SPACING` and a fixed number
//!   of angular slots; each ring is additionally rotated by a
//!   constant twist so slots never line up radially across rings.
//! - Attempts walk the rings inside-out, slot by slot. Every
//!   candidate gets a small random perturbation in radius and angle
//!   so concurrent callers racing on the same inputs diverge.
//! - The first candidate at least `min_separation` away from the
//!   anchor and from every occupied point wins.
//! - After [`MAX_ATTEMPTS`] rejections the engine places at a
//!   random angle on a random outer ring WITHOUT re-validating, so
//!   the fallback may land closer than `min_separation` to an
//!   occupied point.
//!
//! GUARANTEES:
//! - Always returns a coordinate (never "no space found")
//! - A candidate accepted by the search respects `min_separation`
//!   exactly as validated, perturbation included
//! - No state is kept across calls
//!
//! The caller owns persistence: it fetches the occupied set, calls
//! [`place`], and commits the result. The engine never touches
//! storage.

use std::f64::consts::TAU;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const BASE_RADIUS: f64 = 380.0;
pub const RING_SPACING: f64 = 180.0;
pub const SLOTS_PER_RING: usize = 10;
pub const MAX_ATTEMPTS: usize = 50;

/// Rotation applied per ring, chosen away from any multiple of the
/// slot pitch so rings do not form spokes.
const RING_TWIST: f64 = 0.7;

const SLOT_PITCH: f64 = TAU / SLOTS_PER_RING as f64;

const RADIUS_JITTER: f64 = 18.0;
const ANGLE_JITTER: f64 = 0.08;

/// Fallback ring range. Deliberately outside the first search
/// rings, where the zone is least likely to be packed.
const FALLBACK_RING_MIN: usize = 3;
const FALLBACK_RING_MAX: usize = 7;

/// Anchor used for zone keys nothing is configured for.
pub const DEFAULT_ANCHOR: Point = Point { x: 5000.0, y: 5000.0 };

/// A coordinate in a room's world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Resolves a zone key to its anchor coordinate.
///
/// Zones are laid out on a coarse grid, one per task source, far
/// enough apart that their placement rings cannot reach each other.
/// Unknown keys land on the default anchor instead of failing.
pub fn zone_anchor(key: &str) -> Point {
    match key {
        "github" => Point::new(5000.0, 5000.0),
        "linear" => Point::new(15000.0, 5000.0),
        "jira" => Point::new(5000.0, 15000.0),
        "gitlab" => Point::new(15000.0, 15000.0),
        _ => DEFAULT_ANCHOR,
    }
}

/// Places one point near `anchor`, avoiding `occupied`.
pub fn place(anchor: Point, occupied: &[Point], min_separation: f64) -> Point {
    place_with(&mut rand::rng(), anchor, occupied, min_separation)
}

/// [`place`] with a caller-supplied random source, so callers that
/// need reproducible layouts can seed one.
pub fn place_with<R: Rng + ?Sized>(
    rng: &mut R,
    anchor: Point,
    occupied: &[Point],
    min_separation: f64,
) -> Point {
    match search(rng, anchor, occupied, min_separation) {
        Some(point) => point,
        None => fallback(rng, anchor),
    }
}

/// Bounded inside-out search over ring slots.
fn search<R: Rng + ?Sized>(
    rng: &mut R,
    anchor: Point,
    occupied: &[Point],
    min_separation: f64,
) -> Option<Point> {
    for attempt in 0..MAX_ATTEMPTS {
        let ring = (attempt / SLOTS_PER_RING) as f64;
        let slot = (attempt % SLOTS_PER_RING) as f64;

        let radius = BASE_RADIUS
            + ring * RING_SPACING
            + rng.random_range(-RADIUS_JITTER..=RADIUS_JITTER);
        let angle =
            slot * SLOT_PITCH + ring * RING_TWIST + rng.random_range(-ANGLE_JITTER..=ANGLE_JITTER);

        let candidate = Point::new(
            anchor.x + radius * angle.cos(),
            anchor.y + radius * angle.sin(),
        );
        if is_clear(candidate, anchor, occupied, min_separation) {
            return Some(candidate);
        }
    }
    None
}

fn is_clear(candidate: Point, anchor: Point, occupied: &[Point], min_separation: f64) -> bool {
    if candidate.distance(anchor) < min_separation {
        return false;
    }
    occupied.iter().all(|p| candidate.distance(*p) >= min_separation)
}

/// Unvalidated last resort; see module notes.
fn fallback<R: Rng + ?Sized>(rng: &mut R, anchor: Point) -> Point {
    let ring = rng.random_range(FALLBACK_RING_MIN..=FALLBACK_RING_MAX) as f64;
    let radius = BASE_RADIUS + ring * RING_SPACING;
    let angle = rng.random_range(0.0..TAU);
    Point::new(
        anchor.x + radius * angle.cos(),
        anchor.y + radius * angle.sin(),
    )
}
