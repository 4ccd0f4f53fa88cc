//! Workspace-bias decomposition of the manipulator Jacobian.
//!
//! Solves `J q_b = b` through the SVD pseudo-inverse and extracts the
//! right-singular vectors with near-zero singular values as a null-space
//! basis; motion along those leaves the tool position unchanged to first
//! order.

use nalgebra::linalg::{SymmetricEigen, SVD};
use nalgebra::{DMatrix, DVector, Vector3};

/// Singular values below this are treated as zero.
const SINGULAR_VALUE_THRESH: f64 = 1e-7;

/// Iteration cap after which the decomposition is reported as failed.
const MAX_DECOMPOSITION_ITERATIONS: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct BiasDecomposition {
    /// Configuration-space direction realizing the workspace bias,
    /// `pinv(J) * b`, one entry per active DOF.
    pub dof_direction: Vec<f64>,
    /// Unit configuration-space directions with no first-order workspace
    /// effect. Empty for a full-rank square Jacobian.
    pub nullspace: Vec<Vec<f64>>,
}

impl BiasDecomposition {
    /// Decomposes a 3 x n translational Jacobian against a workspace
    /// direction whose magnitude encodes the maximum bias distance.
    ///
    /// Returns `None` when the underlying decompositions fail to converge;
    /// the caller is expected to disable biasing rather than abort.
    pub fn compute(jacobian: &DMatrix<f64>, direction: &Vector3<f64>) -> Option<Self> {
        if jacobian.nrows() != 3 || jacobian.ncols() == 0 {
            return None;
        }
        let dof = jacobian.ncols();

        let svd = SVD::try_new(
            jacobian.clone(),
            true,
            true,
            f64::EPSILON,
            MAX_DECOMPOSITION_ITERATIONS,
        )?;
        let pinv = svd.pseudo_inverse(SINGULAR_VALUE_THRESH).ok()?;
        let b = DVector::from_column_slice(&[direction.x, direction.y, direction.z]);
        let dof_direction: Vec<f64> = (pinv * b).iter().copied().collect();

        // The thin SVD of a 3 x n matrix only carries min(3, n) right-singular
        // vectors; the full null space comes from the eigenbasis of J^T J.
        let jtj = jacobian.transpose() * jacobian;
        let eigen = SymmetricEigen::try_new(jtj, f64::EPSILON, MAX_DECOMPOSITION_ITERATIONS)?;
        let mut nullspace = Vec::new();
        for i in 0..dof {
            let sigma = eigen.eigenvalues[i].max(0.0).sqrt();
            if sigma < SINGULAR_VALUE_THRESH {
                nullspace.push(eigen.eigenvectors.column(i).iter().copied().collect());
            }
        }

        Some(Self {
            dof_direction,
            nullspace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_full_rank_square() {
        // 3-DOF gantry: J is the identity, so the bias maps straight through
        // and the null space is empty.
        let jacobian = DMatrix::<f64>::identity(3, 3);
        let bias = BiasDecomposition::compute(&jacobian, &Vector3::new(0.1, -0.2, 0.3)).unwrap();
        assert_relative_eq!(bias.dof_direction[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(bias.dof_direction[1], -0.2, epsilon = 1e-12);
        assert_relative_eq!(bias.dof_direction[2], 0.3, epsilon = 1e-12);
        assert!(bias.nullspace.is_empty());
    }

    #[test]
    fn test_rank_deficient_yields_nullspace() {
        // Second DOF does not move the tool at all.
        let jacobian = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let bias = BiasDecomposition::compute(&jacobian, &Vector3::new(0.5, 0.0, 0.0)).unwrap();
        assert_relative_eq!(bias.dof_direction[0], 0.5, epsilon = 1e-10);
        assert_relative_eq!(bias.dof_direction[1], 0.0, epsilon = 1e-10);
        assert_eq!(bias.nullspace.len(), 1);
        assert_relative_eq!(bias.nullspace[0][1].abs(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(bias.nullspace[0][0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_redundant_arm_nullspace_dimension() {
        // 5 DOFs onto 3 workspace directions: at least 2 null directions.
        let jacobian = DMatrix::from_row_slice(
            3,
            5,
            &[
                1.0, 0.0, 0.0, 1.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, 0.0, 0.0,
            ],
        );
        let bias = BiasDecomposition::compute(&jacobian, &Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert_eq!(bias.nullspace.len(), 2);
        // Null vectors must actually annihilate the Jacobian.
        for nvec in &bias.nullspace {
            let v = DVector::from_column_slice(nvec);
            let image = &jacobian * v;
            assert!(image.norm() < 1e-9);
        }
    }

    #[test]
    fn test_unbiasable_direction_projects_to_zero() {
        // The Jacobian spans only x, so a z bias has no configuration-space
        // component.
        let jacobian = DMatrix::from_row_slice(3, 1, &[1.0, 0.0, 0.0]);
        let bias = BiasDecomposition::compute(&jacobian, &Vector3::new(0.0, 0.0, 0.7)).unwrap();
        assert_relative_eq!(bias.dof_direction[0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_degenerate_shapes_rejected() {
        let not_three_rows = DMatrix::<f64>::zeros(2, 4);
        assert!(BiasDecomposition::compute(&not_three_rows, &Vector3::z()).is_none());
        let no_columns = DMatrix::<f64>::zeros(3, 0);
        assert!(BiasDecomposition::compute(&no_columns, &Vector3::z()).is_none());
    }
}
