use smithay::utils::{Logical, Point, Rectangle};

pub trait RectExt {
    fn top(self) -> i32;
    fn bottom(self) -> i32;
    fn left(self) -> i32;
    fn right(self) -> i32;

    /// Whether the two rectangles share an interior or border point.
    fn touches(self, other: Self) -> bool;

    /// The point inside this rectangle closest to `point`.
    ///
    /// The right and bottom edges are exclusive, so the result is always contained.
    fn closest_point(self, point: Point<f64, Logical>) -> Point<f64, Logical>;
}

impl RectExt for Rectangle<i32, Logical> {
    fn top(self) -> i32 {
        self.loc.y
    }

    fn bottom(self) -> i32 {
        self.loc.y + self.size.h
    }

    fn left(self) -> i32 {
        self.loc.x
    }

    fn right(self) -> i32 {
        self.loc.x + self.size.w
    }

    fn touches(self, other: Self) -> bool {
        !(self.right() < other.left()
            || self.bottom() < other.top()
            || other.right() < self.left()
            || other.bottom() < self.top())
    }

    fn closest_point(self, point: Point<f64, Logical>) -> Point<f64, Logical> {
        // Same subpixel step as wlroots
        const STEP: f64 = 1.0 / 65536.0;

        let clamp = |value: f64, min: i32, max: i32| {
            let max = (max as f64 - STEP).max(min as f64);
            value.clamp(min as f64, max)
        };

        Point::from((
            clamp(point.x, self.left(), self.right()),
            clamp(point.y, self.top(), self.bottom()),
        ))
    }
}

pub fn distance_squared(a: Point<f64, Logical>, b: Point<f64, Logical>) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use proptest::{prelude::Strategy, proptest};

    use super::*;

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
        Rectangle::new((x, y).into(), (w, h).into())
    }

    #[test]
    fn edge_and_corner_contact_counts_as_touching() {
        let a = rect(0, 0, 100, 100);

        assert!(a.touches(rect(100, 0, 100, 100)));
        assert!(a.touches(rect(0, 100, 100, 100)));
        assert!(a.touches(rect(100, 100, 50, 50)));
        assert!(a.touches(rect(50, 50, 10, 10)));

        assert!(!a.touches(rect(101, 0, 100, 100)));
        assert!(!a.touches(rect(200, 200, 100, 100)));
    }

    #[test]
    fn closest_point_clamps_into_rect() {
        let r = rect(100, 100, 200, 100);

        assert_eq!(r.closest_point((150.0, 150.0).into()), (150.0, 150.0).into());
        assert_eq!(r.closest_point((0.0, 0.0).into()), (100.0, 100.0).into());

        let far = r.closest_point((1000.0, 1000.0).into());
        assert!(far.x < 300.0 && far.x > 299.0);
        assert!(far.y < 200.0 && far.y > 199.0);
        assert!(r.to_f64().contains(far));
    }

    fn arbitrary_rect() -> impl Strategy<Value = Rectangle<i32, Logical>> {
        (-500i32..500, -500i32..500, 1i32..300, 1i32..300)
            .prop_map(|(x, y, w, h)| Rectangle::new((x, y).into(), (w, h).into()))
    }

    proptest! {
        #[test]
        fn touching_is_symmetric(a in arbitrary_rect(), b in arbitrary_rect()) {
            assert_eq!(a.touches(b), b.touches(a));
        }

        #[test]
        fn overlapping_rects_touch(a in arbitrary_rect(), b in arbitrary_rect()) {
            if a.overlaps(b) {
                assert!(a.touches(b));
            }
        }

        #[test]
        fn closest_point_is_contained(r in arbitrary_rect(), x in -2000.0f64..2000.0, y in -2000.0f64..2000.0) {
            let closest = r.closest_point((x, y).into());
            assert!(r.to_f64().contains(closest));
        }
    }
}
