use std::collections::HashSet;

use proptest::prelude::*;
use strata_clipmap::{
    AnchorUpdate, Clipmap, ClipmapConfig, ClipmapError, ClipmapLevel, newly_exposed,
    world_cell_to_texel,
};
use strata_geom::{CellPos, RegionBox};

fn cell() -> impl Strategy<Value = CellPos> {
    (-200i32..200, -200i32..200, -200i32..200).prop_map(|(x, y, z)| CellPos::new(x, y, z))
}

fn step() -> impl Strategy<Value = CellPos> {
    (-3i32..=3, -3i32..=3, -3i32..=3).prop_map(|(x, y, z)| CellPos::new(x, y, z))
}

proptest! {
    // Re-applying the current anchor changes nothing.
    #[test]
    fn zero_delta_is_idempotent(a in cell(), b in cell()) {
        let mut lvl = ClipmapLevel::new(0, 16);
        lvl.update_anchor(a);
        lvl.update_anchor(b);
        let ring = lvl.ring();
        let origin = lvl.origin_min();
        prop_assert_eq!(lvl.update_anchor(b), AnchorUpdate::NotMoved);
        prop_assert_eq!(lvl.ring(), ring);
        prop_assert_eq!(lvl.origin_min(), origin);
    }

    // Small moves keep every surviving cell on its texel and keep the window a
    // bijection onto the texel cube.
    #[test]
    fn shifts_preserve_surviving_texels(
        start in cell(),
        steps in prop::collection::vec(step(), 1..10),
    ) {
        let res = 4u32;
        let mut lvl = ClipmapLevel::new(0, res);
        lvl.update_anchor(start);
        let mut anchor = start;
        for s in steps {
            let before = lvl.window();
            let old: Vec<_> = before.iter().map(|c| (c, lvl.texel_for(c))).collect();
            anchor += s;
            let update = lvl.update_anchor(anchor);
            if s == CellPos::ZERO {
                prop_assert_eq!(update, AnchorUpdate::NotMoved);
            } else if s.max_abs_component() >= res as i32 {
                prop_assert_eq!(update, AnchorUpdate::Invalidated);
            } else {
                prop_assert_eq!(update, AnchorUpdate::Shifted { delta: s });
            }
            let after = lvl.window();
            for (c, texel) in old {
                if after.contains(c) {
                    prop_assert_eq!(lvl.texel_for(c), texel);
                } else {
                    prop_assert_eq!(lvl.texel_for(c), None);
                }
            }
            let mut seen = HashSet::new();
            for c in after.iter() {
                let t = lvl.texel_for(c).unwrap();
                prop_assert!(t.iter().all(|&v| v < res));
                prop_assert!(seen.insert(t));
            }
            prop_assert_eq!(seen.len(), (res * res * res) as usize);
            for r in lvl.ring() {
                prop_assert!(r < res);
            }
        }
    }

    #[test]
    fn anchors_floor_toward_negative_infinity(w in cell(), level in 0u8..6) {
        let lvl = ClipmapLevel::new(level, 8);
        let a = lvl.level_cell(w);
        let size = 1i32 << level;
        prop_assert_eq!(a.x, w.x.div_euclid(size));
        prop_assert_eq!(a.y, w.y.div_euclid(size));
        prop_assert_eq!(a.z, w.z.div_euclid(size));
    }
}

#[test]
fn anchor_moves_one_cell_along_x() {
    let mut lvl = ClipmapLevel::new(0, 8);
    assert_eq!(lvl.update_anchor(CellPos::ZERO), AnchorUpdate::Invalidated);
    assert_eq!(lvl.ring(), [0, 0, 0]);
    assert_eq!(lvl.origin_min(), CellPos::splat(-4));
    let old_edge = lvl.texel_for(CellPos::new(3, 0, 0)).unwrap();
    let departing = lvl.texel_for(CellPos::new(-4, 0, 0)).unwrap();
    assert_eq!(old_edge[0], 7);
    assert_eq!(departing[0], 0);

    let update = lvl.update_anchor(CellPos::new(1, 0, 0));
    assert_eq!(
        update,
        AnchorUpdate::Shifted {
            delta: CellPos::new(1, 0, 0)
        }
    );
    assert_eq!(lvl.ring(), [1, 0, 0]);
    assert_eq!(lvl.origin_min(), CellPos::new(-3, -4, -4));
    // the new column reuses the slot vacated by the departed one (texel 0);
    // texel 7 stays with the surviving edge column at x = 3
    let exposed = lvl.texel_for(CellPos::new(4, 0, 0)).unwrap();
    assert_eq!(exposed[0], departing[0]);
    assert_eq!(lvl.texel_for(CellPos::new(3, 0, 0)).unwrap(), old_edge);
    assert_eq!(lvl.texel_for(CellPos::new(-4, 0, 0)), None);
}

#[test]
fn full_window_jump_invalidates() {
    let mut lvl = ClipmapLevel::new(2, 8);
    lvl.update_anchor(CellPos::ZERO);
    assert_eq!(
        lvl.update_anchor(CellPos::new(0, 8, 0)),
        AnchorUpdate::Invalidated
    );
    assert!(matches!(
        lvl.update_anchor(CellPos::new(0, 1, -7)),
        AnchorUpdate::Shifted { .. }
    ));
    assert!(lvl.ring().iter().all(|&r| r < 8));
}

#[test]
fn texel_rejects_cells_outside_window() {
    let origin = CellPos::new(10, 10, 10);
    assert_eq!(world_cell_to_texel(CellPos::new(9, 10, 10), origin, [0; 3], 4), None);
    assert_eq!(world_cell_to_texel(CellPos::new(14, 10, 10), origin, [0; 3], 4), None);
    assert_eq!(
        world_cell_to_texel(CellPos::new(13, 10, 11), origin, [2, 0, 3], 4),
        Some([1, 0, 0])
    );
}

#[test]
fn newly_exposed_is_x_fastest_difference() {
    let prev = RegionBox::new(CellPos::ZERO, CellPos::new(2, 2, 1));
    let next = RegionBox::new(CellPos::new(1, 0, 0), CellPos::new(3, 2, 1));
    let got: Vec<_> = newly_exposed(&prev, &next).collect();
    assert_eq!(got, vec![CellPos::new(2, 0, 0), CellPos::new(2, 1, 0)]);
    assert_eq!(newly_exposed(&next, &next).count(), 0);
}

#[test]
fn clipmap_reports_exposed_and_departed_regions() {
    let cfg = ClipmapConfig {
        levels: 2,
        resolution: 8,
        region_size: 4,
    };
    let mut map = Clipmap::new(cfg).unwrap();
    let first = map.update(CellPos::ZERO);
    assert_eq!(first.len(), 2);
    for u in &first {
        assert_eq!(u.update, AnchorUpdate::Invalidated);
        // origin_min is region aligned at the origin: 2 regions per axis
        assert_eq!(u.exposed.len(), 8);
        assert!(u.departed.is_empty());
    }
    assert!(map.update(CellPos::ZERO).is_empty());

    // Level 0 moves by one cell: its window straddles an extra region column.
    let moved = map.update(CellPos::new(1, 0, 0));
    assert_eq!(moved.len(), 1);
    let u = &moved[0];
    assert_eq!(u.level, 0);
    assert_eq!(u.exposed.len(), 4);
    assert!(u.exposed.iter().all(|k| k.coord.x == 1 && k.level == 0));
    assert!(u.departed.is_empty());
    assert_eq!(
        map.region_window(0),
        Some(RegionBox::new(CellPos::new(-1, -1, -1), CellPos::new(2, 1, 1)))
    );

    // A further 3 cells aligns the window again; the old left column departs.
    let moved = map.update(CellPos::new(4, 0, 0));
    let u = moved.iter().find(|u| u.level == 0).unwrap();
    assert!(u.exposed.is_empty());
    assert_eq!(u.departed.len(), 4);
    assert!(u.departed.iter().all(|k| k.coord.x == -1));

    assert_eq!(map.texel_for_world_cell(0, CellPos::new(4, 0, 0)), Some([0, 4, 4]));
    assert_eq!(map.texel_for_world_cell(5, CellPos::ZERO), None);
}

#[test]
fn invalid_configs_are_rejected() {
    let bad_res = ClipmapConfig {
        resolution: 12,
        ..ClipmapConfig::default()
    };
    assert_eq!(Clipmap::new(bad_res).err(), Some(ClipmapError::Resolution(12)));
    let bad_region = ClipmapConfig {
        region_size: 5,
        ..ClipmapConfig::default()
    };
    assert!(matches!(
        Clipmap::new(bad_region),
        Err(ClipmapError::RegionSize { .. })
    ));
    let no_levels = ClipmapConfig {
        levels: 0,
        ..ClipmapConfig::default()
    };
    assert_eq!(Clipmap::new(no_levels).err(), Some(ClipmapError::LevelCount(0)));
}
