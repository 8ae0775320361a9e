//! Accumulated output records.
//!
//! Records are derived once per coadd file and appended here; nothing is
//! mutated after it has been appended.

/// One surviving target within an observation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub target_id: i64,
    pub tile_id: String,
    pub night: String,
    pub petal: u8,
    pub fiber_status: i32,
    pub target_bits: u64,
    /// Space-delimited category names decoded from `target_bits`.
    pub categories: String,
    pub flux_b: Vec<f32>,
    pub flux_r: Vec<f32>,
    pub flux_z: Vec<f32>,
    pub flux_brz: Vec<f32>,
}

/// Per-unit wavelength grids, shared by every target in the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitWave {
    pub tile_id: String,
    pub night: String,
    pub petal: u8,
    pub wave_b: Vec<f64>,
    pub wave_r: Vec<f64>,
    pub wave_z: Vec<f64>,
    pub wave_brz: Vec<f64>,
}

impl UnitWave {
    /// Grouping key shared with the unit's target records.
    pub fn unit_key(&self) -> (&str, &str, u8) {
        (&self.night, &self.tile_id, self.petal)
    }
}

/// The dataset being built over one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub targets: Vec<TargetRecord>,
    pub waves: Vec<UnitWave>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fully processed observation unit.
    pub fn append_unit(&mut self, wave: UnitWave, targets: Vec<TargetRecord>) {
        self.waves.push(wave);
        self.targets.extend(targets);
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn num_units(&self) -> usize {
        self.waves.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(tile: &str, night: &str, petal: u8) -> UnitWave {
        UnitWave {
            tile_id: tile.to_string(),
            night: night.to_string(),
            petal,
            wave_b: vec![1.0],
            wave_r: vec![2.0],
            wave_z: vec![3.0],
            wave_brz: vec![1.0, 2.0, 3.0],
        }
    }

    #[test]
    fn test_append_unit() {
        let mut ds = Dataset::new();

        let record = TargetRecord {
            target_id: 1,
            tile_id: "100".to_string(),
            night: "20230101".to_string(),
            petal: 5,
            fiber_status: 0,
            target_bits: 2,
            categories: "ELG".to_string(),
            flux_b: vec![0.1],
            flux_r: vec![0.2],
            flux_z: vec![0.3],
            flux_brz: vec![0.1, 0.2, 0.3],
        };
        ds.append_unit(wave("100", "20230101", 5), vec![record]);

        assert_eq!(ds.num_units(), 1);
        assert_eq!(ds.num_targets(), 1);
        assert_eq!(ds.waves[0].unit_key(), ("20230101", "100", 5));
    }
}
