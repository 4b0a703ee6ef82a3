//! Slot budget per surface
//!
//! The cache budget is expressed in full-size reference pages. A surface gets
//! as many slots as fit in that budget at its own size, so a thumbnail strip
//! keeps many pages around while a fullscreen surface keeps few.

use crate::types::Geometry;

/// Number of pages a surface of `geometry` may keep cached.
///
/// `slots = max(1, floor(max_pages / (area / reference_area)))`. A surface that
/// has not been laid out yet (zero area) gets the whole budget.
#[must_use]
pub fn slots_for(max_pages: usize, reference: Geometry, geometry: Geometry) -> usize {
    let max_pages = max_pages.max(1);
    if geometry.is_empty() || reference.is_empty() {
        return max_pages;
    }

    // Integer form of floor(max_pages * reference_area / area), no float rounding.
    let scaled = (max_pages as u128) * u128::from(reference.area());
    let slots = scaled / u128::from(geometry.area());
    usize::try_from(slots).unwrap_or(usize::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: Geometry = Geometry::new(1000, 1000);

    #[test]
    fn inverse_area_proportionality() {
        assert_eq!(slots_for(4, REFERENCE, Geometry::new(1000, 1000)), 4);
        assert_eq!(slots_for(4, REFERENCE, Geometry::new(2000, 2000)), 1);
    }

    #[test]
    fn floors_at_one() {
        assert_eq!(slots_for(4, REFERENCE, Geometry::new(4000, 4000)), 1);
        assert_eq!(slots_for(0, REFERENCE, Geometry::new(4000, 4000)), 1);
    }

    #[test]
    fn small_surfaces_get_more_slots() {
        let thumb = slots_for(200, REFERENCE, Geometry::new(100, 100));
        let full = slots_for(200, REFERENCE, Geometry::new(1000, 1000));
        assert_eq!(full, 200);
        assert_eq!(thumb, 20_000);
    }

    #[test]
    fn rounds_down() {
        // 3 reference pages over a surface 2x the reference area
        assert_eq!(slots_for(3, REFERENCE, Geometry::new(2000, 1000)), 1);
        assert_eq!(slots_for(5, REFERENCE, Geometry::new(2000, 1000)), 2);
    }

    #[test]
    fn unlaid_surface_gets_whole_budget() {
        assert_eq!(slots_for(200, REFERENCE, Geometry::default()), 200);
    }
}
