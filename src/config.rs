//! Calibration settings.
//!
//! Every field has a default, so a JSON file only needs the values it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CalibError, Result};
use crate::segmentation::StabilityConfig;
use crate::supervisor::SupervisorSettings;
use crate::types::{Axis, JointPoseDeg};

pub const HOME_POSE_DEG: JointPoseDeg = [
    -5.6850536735238373e-05,
    -39.999988598597405,
    -7.796941005345694e-05,
    89.99967467229428,
    -1.394160247868911e-05,
    39.99993054198945,
    -1.9290991341998603e-06,
];

/// One damping direction: travel vector and the joint pose it starts from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionConfig {
    pub name: String,
    pub vector: [f64; 3],
    pub start_pose_deg: JointPoseDeg,
}

impl DirectionConfig {
    fn new(name: &str, vector: [f64; 3], start_pose_deg: JointPoseDeg) -> Self {
        Self {
            name: name.to_string(),
            vector,
            start_pose_deg,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DampingConfig {
    pub start_m: f64,
    pub final_m: f64,
    pub chunk_m: f64,
    pub period_s: f64,
    pub directions: Vec<DirectionConfig>,
}

impl Default for DampingConfig {
    fn default() -> Self {
        Self {
            start_m: 0.05,
            final_m: 0.30,
            chunk_m: 0.05,
            period_s: 0.01,
            directions: vec![
                DirectionConfig::new(
                    "X+",
                    [1.0, 0.0, 0.0],
                    [
                        -0.7858643304937192, -13.877941212036967, 0.7483301998416312, 135.73910879757133,
                        -0.3498534951328406, 59.615865011733526, 0.20912087569310536,
                    ],
                ),
                DirectionConfig::new(
                    "X-",
                    [-1.0, 0.0, 0.0],
                    [
                        -0.2855396601635595, -56.758223145490426, 0.5327849576037542, 57.86894167833725,
                        -0.48200287464114594, 24.624889557006437, 0.238431685366579,
                    ],
                ),
                DirectionConfig::new(
                    "Y+",
                    [0.0, 1.0, 0.0],
                    [
                        -30.054273523613276, -35.45994478096467, -5.216496361647684, 86.32941104939634,
                        3.6267676975946497, 31.560050198127808, -36.204653966689314,
                    ],
                ),
                DirectionConfig::new(
                    "Y-",
                    [0.0, -1.0, 0.0],
                    [
                        11.499646290703584, -15.723928755400058, 12.734033082459526, 119.45227683180816,
                        -4.942539608421156, 44.72109048587742, 27.27025255890027,
                    ],
                ),
                DirectionConfig::new(
                    "Z+",
                    [0.0, 0.0, 1.0],
                    [
                        -3.9142230390577724, -27.200417289718366, 3.2210181754397524, 123.34058058362135,
                        -3.0135921604966938, 60.46807454482518, 1.5388601898695797,
                    ],
                ),
                DirectionConfig::new(
                    "Z-",
                    [0.0, 0.0, -1.0],
                    [
                        -2.165982546368497, -2.4958115276766875, 1.689129474279949, 72.77022195937903,
                        -0.012274134254111531, -14.737328420174004, -0.35489540204087305,
                    ],
                ),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DragConfig {
    pub linear_threshold: f64,  // m/s
    pub angular_threshold: f64, // rad/s
    pub period_s: f64,
    pub trials: usize,
    pub axes: Vec<Axis>,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            linear_threshold: 0.01,
            angular_threshold: 0.1,
            period_s: 0.01,
            trials: 5,
            axes: Axis::ALL.to_vec(),
        }
    }
}

impl DragConfig {
    pub fn threshold(&self, axis: Axis) -> f64 {
        if axis.is_rotational() {
            self.angular_threshold
        } else {
            self.linear_threshold
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StiffnessConfig {
    pub stability: StabilityConfig,
    pub trials: usize,
    pub axes: Vec<Axis>,
    pub pause_s: f64,
    /// Give up on a trial after this long; `None` waits for the operator.
    pub max_wait_s: Option<f64>,
}

impl Default for StiffnessConfig {
    fn default() -> Self {
        Self {
            stability: StabilityConfig::default(),
            trials: 5,
            axes: Axis::LINEAR.to_vec(),
            pause_s: 1.0,
            max_wait_s: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparencyConfig {
    pub band_low: f64,  // N
    pub band_high: f64, // N
    pub period_s: f64,
    pub dwell_s: f64,
    pub trials: usize,
    pub teardown_pause_s: f64,
}

impl Default for TransparencyConfig {
    fn default() -> Self {
        Self {
            band_low: 9.0,
            band_high: 11.0,
            period_s: 0.1,
            dwell_s: 3.0,
            trials: 5,
            teardown_pause_s: 3.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub dwell_s: f64,
    pub period_s: f64,
    pub trials: usize,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            dwell_s: 3.0,
            period_s: 0.01,
            trials: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoverConfig {
    pub window_s: f64,
    pub threshold_mm: f64,
    pub trials: usize,
    pub vel_scale: f64,
    pub test_poses_deg: Vec<JointPoseDeg>,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            window_s: 1.0,
            threshold_mm: 10.0,
            trials: 10,
            vel_scale: 25.0,
            test_poses_deg: vec![
                HOME_POSE_DEG,
                [
                    -1.9044804296524143, -6.446138733250514, 1.7813227273838543, 105.78366811126669,
                    0.01993463080299201, 22.22781246922564, -0.08457543773347569,
                ],
                [
                    29.045693639633996, -35.54101229623877, 1.3417330329797759, 114.2940633281328,
                    -63.59731205327565, -15.533069364291974, 64.116044430268,
                ],
                [
                    -3.2642652257251, -49.085789687104665, 2.0678128777397085, 112.8067213341916,
                    -6.5256809819053, 156.3619360945694, -4.714375858493576,
                ],
                [
                    1.7785820072571665, -41.79144476539052, -0.44597925633254565, 80.59858180635628,
                    -1.4068501355481982, -55.52552426423344, -20.594531530808666,
                ],
                [
                    -29.870056491474276, -38.30158692907401, -24.50869096372978, 81.13731297724217,
                    66.41504512419088, -47.28616461406268, -67.86525137960776,
                ],
                [
                    -19.548061172401624, -41.799138973491985, -16.676540361762452, 114.56878719698062,
                    -156.30846937373647, -62.92388272174265, 12.092397427745253,
                ],
                [
                    -52.16029688972555, 5.5811050931029325, -31.065633294585272, 127.25281731829074,
                    39.33474866388078, 35.633667227441975, -99.20402393915312,
                ],
                [
                    53.2187576452228, -86.36379422168464, -81.1679532058646, 112.68209770257214,
                    -18.790241438562685, 67.06243094441373, 72.64664334670279,
                ],
                [
                    -72.04356496363411, -89.724056048665, 86.44702007673688, 66.80374435974011,
                    -2.3625400227927327, -6.845101608690083, -59.72234766091402,
                ],
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub home_pose_deg: JointPoseDeg,
    pub sync_vel_scale: f64,
    pub pose_tool_vel_scale: f64,
    pub home_timeout_s: f64,  // reach-wait for home and final poses
    pub trial_timeout_s: f64, // reach-wait between hover test poses
    pub warmup_s: f64,        // after launching teleop, before measuring
    pub bridge_timeout_s: f64, // longest wait for one robot bridge reply
    pub pose_file: PathBuf,
    pub supervisor: SupervisorSettings,
    pub damping: DampingConfig,
    pub drag: DragConfig,
    pub stiffness: StiffnessConfig,
    pub transparency: TransparencyConfig,
    pub contact: ContactConfig,
    pub hover: HoverConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            home_pose_deg: HOME_POSE_DEG,
            sync_vel_scale: 25.0,
            pose_tool_vel_scale: 15.0,
            home_timeout_s: 7.0,
            trial_timeout_s: 5.0,
            warmup_s: 7.0,
            bridge_timeout_s: 2.0,
            pose_file: PathBuf::from("save_pose.csv"),
            supervisor: SupervisorSettings::default(),
            damping: DampingConfig::default(),
            drag: DragConfig::default(),
            stiffness: StiffnessConfig::default(),
            transparency: TransparencyConfig::default(),
            contact: ContactConfig::default(),
            hover: HoverConfig::default(),
        }
    }
}

impl CalibrationConfig {
    /// Defaults when `path` is `None`, otherwise the JSON file over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| CalibError::Config(format!("{}: {}", path.display(), e)))?;
                let config: Self = serde_json::from_str(&text)?;
                log::info!("[config] loaded {}", path.display());
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.damping;
        if !(d.start_m >= 0.0 && d.final_m > d.start_m && d.chunk_m > 0.0) {
            return Err(CalibError::Config(format!(
                "damping zone [{}, {}] with chunk {} is invalid",
                d.start_m, d.final_m, d.chunk_m
            )));
        }
        if let Some(dir) = d.directions.iter().find(|dir| dir.vector.iter().all(|c| *c == 0.0)) {
            return Err(CalibError::Config(format!("direction {} has a zero vector", dir.name)));
        }
        let periods = [
            d.period_s,
            self.drag.period_s,
            self.stiffness.stability.sample_period_s,
            self.transparency.period_s,
            self.contact.period_s,
        ];
        if periods.iter().any(|p| *p <= 0.0) {
            return Err(CalibError::Config("sample periods must be positive".to_string()));
        }
        if self.transparency.band_low > self.transparency.band_high {
            return Err(CalibError::Config("transparency band is reversed".to_string()));
        }
        if self.hover.test_poses_deg.is_empty() {
            return Err(CalibError::Config("hover needs at least one test pose".to_string()));
        }
        if let Some(limit) = self.stiffness.max_wait_s {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(CalibError::Config(format!("stiffness max_wait_s {limit} must be positive")));
            }
        }
        if !(self.bridge_timeout_s.is_finite() && self.bridge_timeout_s > 0.0) {
            return Err(CalibError::Config("bridge_timeout_s must be positive".to_string()));
        }
        if self.stiffness.stability.window == 0 {
            return Err(CalibError::Config("stability window must hold at least one value".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_procedure_constants() {
        let config = CalibrationConfig::default();
        assert_eq!(config.damping.directions.len(), 6);
        assert_eq!(config.hover.test_poses_deg.len(), 10);
        assert_eq!(config.hover.test_poses_deg[0], HOME_POSE_DEG);
        assert_eq!(config.drag.threshold(Axis::Rz), 0.1);
        assert_eq!(config.drag.threshold(Axis::Y), 0.01);
        assert_eq!(config.stiffness.axes, vec![Axis::X, Axis::Y, Axis::Z]);
        assert_eq!(config.stiffness.max_wait_s, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"warmup_s": 1.5, "damping": {"final_m": 0.25}, "stiffness": {"max_wait_s": 60}}"#;
        let config: CalibrationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.warmup_s, 1.5);
        assert_eq!(config.damping.final_m, 0.25);
        assert_eq!(config.damping.start_m, 0.05);
        assert_eq!(config.damping.directions.len(), 6);
        assert_eq!(config.stiffness.max_wait_s, Some(60.0));
        assert_eq!(config.supervisor.grace_s, 1.0);
    }

    #[test]
    fn test_validation_rejects_bad_zone() {
        let mut config = CalibrationConfig::default();
        config.damping.final_m = 0.01;
        assert!(matches!(config.validate(), Err(CalibError::Config(_))));

        let mut config = CalibrationConfig::default();
        config.damping.directions[2].vector = [0.0; 3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_wait_limits() {
        for limit in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let mut config = CalibrationConfig::default();
            config.stiffness.max_wait_s = Some(limit);
            assert!(matches!(config.validate(), Err(CalibError::Config(_))), "{limit}");
        }

        let mut config = CalibrationConfig::default();
        config.bridge_timeout_s = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let result = CalibrationConfig::load(Some(Path::new("/nonexistent/calib.json")));
        assert!(matches!(result, Err(CalibError::Config(_))));
        assert!(CalibrationConfig::load(None).is_ok());
    }
}
