//! Internal-coordinate placement of a new atom.
//!
//! Converts a (focus, distance, angle, dihedral) z-matrix row into a
//! Cartesian position relative to the atoms already placed.

type Vec3 = [f64; 3];

const COLLINEAR_EPS: f64 = 1e-8;

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Unit vector perpendicular to `v`, using whichever axis is least aligned with it.
fn any_perpendicular(v: Vec3) -> Vec3 {
    let axis = if v[0].abs() <= v[1].abs() && v[0].abs() <= v[2].abs() {
        [1.0, 0.0, 0.0]
    } else if v[1].abs() <= v[2].abs() {
        [0.0, 1.0, 0.0]
    } else {
        [0.0, 0.0, 1.0]
    };
    let p = cross(v, axis);
    scale(p, 1.0 / norm(p))
}

/// Places a point at `distance` from `c`, making `angle` with `b` and
/// `dihedral` with `a` (natural extension reference frame).
///
/// When `a`, `b` and `c` are collinear the dihedral plane is undefined; an
/// arbitrary plane through the `b`-`c` bond is used instead.
pub fn position_point(a: Vec3, b: Vec3, c: Vec3, distance: f64, angle: f64, dihedral: f64) -> Vec3 {
    let bc = sub(c, b);
    let bc_len = norm(bc);
    let bc_hat = if bc_len < COLLINEAR_EPS {
        [1.0, 0.0, 0.0]
    } else {
        scale(bc, 1.0 / bc_len)
    };

    let n = cross(sub(b, a), bc_hat);
    let n_len = norm(n);
    let n_hat = if n_len < COLLINEAR_EPS {
        any_perpendicular(bc_hat)
    } else {
        scale(n, 1.0 / n_len)
    };
    let m_hat = cross(n_hat, bc_hat);

    let local = [
        -distance * angle.cos(),
        distance * angle.sin() * dihedral.cos(),
        distance * angle.sin() * dihedral.sin(),
    ];

    add(
        c,
        add(
            scale(bc_hat, local[0]),
            add(scale(m_hat, local[1]), scale(n_hat, local[2])),
        ),
    )
}

/// Indices of the atoms other than `focus`, nearest first (ties by index).
fn neighbours_by_distance(positions: &[Vec3], focus: usize) -> Vec<usize> {
    let mut others: Vec<usize> = (0..positions.len()).filter(|&i| i != focus).collect();
    others.sort_by(|&i, &j| {
        let di = norm(sub(positions[i], positions[focus]));
        let dj = norm(sub(positions[j], positions[focus]));
        di.total_cmp(&dj).then(i.cmp(&j))
    });
    others
}

/// Computes the position of a new atom attached to `positions[focus]`.
///
/// Fallbacks for small molecules:
/// - no atoms: the origin; `focus` and all geometry are ignored;
/// - one atom: `distance` along +x from the focus; angle and dihedral ignored;
/// - two atoms: the angle is measured against the other atom and the
///   dihedral against an auxiliary point offset from it along +z;
/// - otherwise the nearest and second-nearest neighbours of the focus
///   serve as angle and dihedral references.
///
/// `focus` must index into `positions` when it is non-empty; out-of-range
/// values are clamped to the last atom.
pub fn position_atom_helper(
    positions: &[Vec3],
    focus: usize,
    distance: f64,
    angle: f64,
    dihedral: f64,
) -> Vec3 {
    if positions.is_empty() {
        return [0.0; 3];
    }
    debug_assert!(focus < positions.len(), "focus {focus} out of range");
    let focus = focus.min(positions.len() - 1);
    let c = positions[focus];

    match positions.len() {
        1 => add(c, [distance, 0.0, 0.0]),
        2 => {
            let b = positions[1 - focus];
            let a = add(b, [0.0, 0.0, 1.0]);
            position_point(a, b, c, distance, angle, dihedral)
        }
        _ => {
            let neighbours = neighbours_by_distance(positions, focus);
            let b = positions[neighbours[0]];
            let a = positions[neighbours[1]];
            position_point(a, b, c, distance, angle, dihedral)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn close(a: Vec3, b: Vec3) -> bool {
        norm(sub(a, b)) < 1e-9
    }

    fn angle_between(a: Vec3, vertex: Vec3, b: Vec3) -> f64 {
        let u = sub(a, vertex);
        let v = sub(b, vertex);
        (dot(u, v) / (norm(u) * norm(v))).acos()
    }

    #[test]
    fn empty_molecule_places_at_origin() {
        assert_eq!(position_atom_helper(&[], 0, 1.5, 1.0, 1.0), [0.0; 3]);
    }

    #[test]
    fn single_atom_places_along_x() {
        let p = position_atom_helper(&[[1.0, 1.0, 1.0]], 0, 1.5, 2.0, 0.3);
        assert!(close(p, [2.5, 1.0, 1.0]));
    }

    #[test]
    fn two_atoms_respect_distance_and_angle() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let p = position_atom_helper(&positions, 1, 1.2, FRAC_PI_2, 0.4);
        assert!((norm(sub(p, positions[1])) - 1.2).abs() < 1e-9);
        assert!((angle_between(p, positions[1], positions[0]) - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn two_atoms_along_z_do_not_degenerate() {
        let positions = [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let p = position_atom_helper(&positions, 0, 1.0, 2.0, 1.0);
        assert!(p.iter().all(|x| x.is_finite()));
        assert!((norm(p) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn three_atoms_mirror_on_dihedral_sign() {
        let positions = [[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [2.0, 1.4, 0.0]];
        let p = position_atom_helper(&positions, 2, 1.1, 1.9, 1.0);
        let q = position_atom_helper(&positions, 2, 1.1, 1.9, -1.0);
        // The three reference atoms lie in z = 0, so the two choices mirror through it.
        assert!((p[2] + q[2]).abs() < 1e-9);
        assert!((p[0] - q[0]).abs() < 1e-9);
        assert!((p[1] - q[1]).abs() < 1e-9);
        assert!(p[2].abs() > 1e-3);
    }

    #[test]
    fn planar_dihedral_stays_in_plane() {
        let positions = [[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [2.0, 1.4, 0.0]];
        let p = position_atom_helper(&positions, 2, 1.0, 2.0, PI);
        assert!(p[2].abs() < 1e-9);
    }

    #[test]
    fn collinear_references_fall_back() {
        let p = position_point(
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            1.0,
            FRAC_PI_2,
            0.0,
        );
        assert!(p.iter().all(|x| x.is_finite()));
        assert!((norm(sub(p, [2.0, 0.0, 0.0])) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn neighbours_sorted_by_distance_then_index() {
        let positions = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert_eq!(neighbours_by_distance(&positions, 0), vec![2, 3, 1]);
    }
}
