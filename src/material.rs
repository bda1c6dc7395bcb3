//! Material catalog.
//!
//! Only the four presets below are accepted. The unit suffix of the preset
//! name says which length unit the geometry is drawn in and therefore which
//! stress unit the raw results come out in.

use nalgebra::SMatrix;

use crate::error::{FerrostaticError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSystem {
    /// Geometry in metres, stresses in Pa
    Meter,
    /// Geometry in centimetres, stresses in N/cm²
    Centimeter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub name: &'static str,
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub unit_system: UnitSystem,
}

pub const PRESETS: [Material; 4] = [
    Material {
        name: "Structural Steel [m]",
        youngs_modulus: 210e9,
        poisson_ratio: 0.30,
        unit_system: UnitSystem::Meter,
    },
    Material {
        name: "Titanium [m]",
        youngs_modulus: 110e9,
        poisson_ratio: 0.34,
        unit_system: UnitSystem::Meter,
    },
    Material {
        name: "Structural Steel [cm]",
        youngs_modulus: 210e5,
        poisson_ratio: 0.30,
        unit_system: UnitSystem::Centimeter,
    },
    Material {
        name: "Titanium [cm]",
        youngs_modulus: 1.1e7,
        poisson_ratio: 0.34,
        unit_system: UnitSystem::Centimeter,
    },
];

impl Material {
    /// Looks up a preset by its exact name
    pub fn from_name(name: &str) -> Result<Material> {
        PRESETS
            .iter()
            .find(|m| m.name == name)
            .copied()
            .ok_or_else(|| FerrostaticError::UnknownMaterial(name.to_owned()))
    }

    /// Shear modulus μ = E / (2(1 + ν))
    pub fn mu(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poisson_ratio))
    }

    /// First Lamé parameter λ = Eν / ((1 + ν)(1 − 2ν))
    pub fn lambda(&self) -> f64 {
        let nu = self.poisson_ratio;
        self.youngs_modulus * nu / ((1.0 + nu) * (1.0 - 2.0 * nu))
    }

    /// Factor converting raw stresses of this material to MPa
    pub fn stress_scale(&self) -> f64 {
        stress_scale_for(self.name)
    }

    /// Isotropic stress-strain matrix in Voigt notation
    /// `[xx, yy, zz, xy, yz, xz]` with engineering shear strains
    pub fn stress_strain_matrix(&self) -> SMatrix<f64, 6, 6> {
        compute_stress_strain_matrix(self.lambda(), self.mu())
    }
}

/// Scale factor from the unit suffix of a material label: N/cm² → MPa for
/// "[cm]", Pa → MPa for "[m]", otherwise unchanged
pub fn stress_scale_for(material_name: &str) -> f64 {
    let label = material_name.to_lowercase();
    if label.contains("[cm]") {
        0.01
    } else if label.contains("[m]") {
        1e-6
    } else {
        1.0
    }
}

/// Calculates the stress-strain matrix from the Lamé parameters
///
/// # Arguments
/// * `lambda` - First Lamé parameter
/// * `mu` - Shear modulus
///
/// # Returns
/// A 6x6 stress-strain matrix
pub fn compute_stress_strain_matrix(lambda: f64, mu: f64) -> SMatrix<f64, 6, 6> {
    let mut stress_strain_mat: SMatrix<f64, 6, 6> = SMatrix::zeros();

    for i in 0..3 {
        for j in 0..3 {
            stress_strain_mat[(i, j)] = lambda;
        }
        stress_strain_mat[(i, i)] += 2.0 * mu;
        stress_strain_mat[(i + 3, i + 3)] = mu;
    }

    stress_strain_mat
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn steel_lame_parameters() {
        let steel = Material::from_name("Structural Steel [m]").unwrap();
        assert_relative_eq!(steel.mu(), 8.076923e10, max_relative = 1e-6);
        assert_relative_eq!(steel.lambda(), 1.211538e11, max_relative = 1e-6);
    }

    #[test]
    fn presets_are_deterministic() {
        for preset in PRESETS {
            let a = Material::from_name(preset.name).unwrap();
            let b = Material::from_name(preset.name).unwrap();
            assert_eq!(a.mu(), b.mu());
            assert_eq!(a.lambda(), b.lambda());

            let e = preset.youngs_modulus;
            let nu = preset.poisson_ratio;
            assert_relative_eq!(a.mu(), e / (2.0 * (1.0 + nu)), max_relative = 1e-14);
        }
    }

    #[test]
    fn unknown_material_is_rejected() {
        let err = Material::from_name("Aluminium [mm]").unwrap_err();
        assert!(matches!(err, FerrostaticError::UnknownMaterial(_)));
        assert!(Material::from_name("titanium [cm]").is_err());
    }

    #[test]
    fn unit_scale() {
        assert_relative_eq!(1.0 * stress_scale_for("Titanium [cm]"), 0.01);
        assert_relative_eq!(1.0 * stress_scale_for("Structural Steel [m]"), 1e-6);
        assert_relative_eq!(stress_scale_for("Unitless"), 1.0);
    }

    #[test]
    fn stress_strain_matrix_uniaxial() {
        let titanium = Material::from_name("Titanium [cm]").unwrap();
        let d = titanium.stress_strain_matrix();

        // uniaxial stress state: σ = [E, 0, 0] for ε = [1, -ν, -ν]
        let nu = titanium.poisson_ratio;
        let strain = nalgebra::Vector6::new(1.0, -nu, -nu, 0.0, 0.0, 0.0);
        let stress = d * strain;
        assert_relative_eq!(stress[0], titanium.youngs_modulus, max_relative = 1e-12);
        assert_relative_eq!(stress[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(stress[2], 0.0, epsilon = 1e-6);
    }
}
