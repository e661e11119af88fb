use glam::DVec3;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn volume(&self) -> f64 {
        let size = self.size().max(DVec3::ZERO);
        size.x * size.y * size.z
    }

    /// Volume shared by both boxes, zero when they only touch.
    pub fn intersection_volume(&self, other: &Aabb) -> f64 {
        Aabb::new(self.min.max(other.min), self.max.min(other.max)).volume()
    }
}

/// Bounding box of child `index` (0..8) of `aabb`.
///
/// The child index encodes one octant per bit: bit 2 selects the upper x half,
/// bit 1 the upper y half and bit 0 the upper z half. This is the octant order
/// PotreeConverter 2.x uses when it writes child masks and node names, so bit 0
/// is z, not x. Any other bit order places the children of real datasets in
/// the wrong boxes. Both halves share the exact center plane.
pub fn create_child_aabb(aabb: &Aabb, index: usize) -> Aabb {
    let center = aabb.center();
    let mut min = aabb.min;
    let mut max = center;

    if (index & 0b0001) > 0 {
        min.z = center.z;
        max.z = aabb.max.z;
    }
    if (index & 0b0010) > 0 {
        min.y = center.y;
        max.y = aabb.max.y;
    }
    if (index & 0b0100) > 0 {
        min.x = center.x;
        max.x = aabb.max.x;
    }

    Aabb::new(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> Aabb {
        Aabb::new(DVec3::new(-4.0, 10.0, 0.5), DVec3::new(12.0, 18.0, 2.5))
    }

    #[test]
    fn child_zero_is_the_low_octant() {
        let child = create_child_aabb(&parent(), 0);
        assert_eq!(child.min, DVec3::new(-4.0, 10.0, 0.5));
        assert_eq!(child.max, DVec3::new(4.0, 14.0, 1.5));
    }

    #[test]
    fn each_bit_moves_one_axis() {
        let parent = parent();
        let low = create_child_aabb(&parent, 0);

        let z = create_child_aabb(&parent, 1);
        assert_eq!(z.min, DVec3::new(low.min.x, low.min.y, 1.5));
        assert_eq!(z.max, DVec3::new(low.max.x, low.max.y, 2.5));

        let y = create_child_aabb(&parent, 2);
        assert_eq!(y.min, DVec3::new(low.min.x, 14.0, low.min.z));

        let x = create_child_aabb(&parent, 4);
        assert_eq!(x.min, DVec3::new(4.0, low.min.y, low.min.z));

        let all = create_child_aabb(&parent, 7);
        assert_eq!(all.min, parent.center());
        assert_eq!(all.max, parent.max);
    }

    #[test]
    fn children_tile_the_parent() {
        let boxes = [
            parent(),
            Aabb::new(DVec3::ZERO, DVec3::ONE),
            Aabb::new(
                DVec3::new(1339072.07, 7238866.339, 85.281),
                DVec3::new(1342205.006, 7241999.275, 3218.217),
            ),
        ];

        for parent in boxes {
            let children: Vec<Aabb> = (0..8).map(|i| create_child_aabb(&parent, i)).collect();

            let total: f64 = children.iter().map(Aabb::volume).sum();
            let relative = (total - parent.volume()).abs() / parent.volume();
            assert!(relative < 1e-12, "union volume differs: {relative}");

            for (i, a) in children.iter().enumerate() {
                assert!(a.min.cmpge(parent.min).all() && a.max.cmple(parent.max).all());
                for b in &children[i + 1..] {
                    assert_eq!(a.intersection_volume(b), 0.0);
                }
            }
        }
    }
}
