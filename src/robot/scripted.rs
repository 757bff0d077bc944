use std::collections::VecDeque;

use super::{Mode, Primitive, RobotClient};
use crate::error::{CalibError, Result};
use crate::types::RobotStates;

/// Command received by a [`ScriptedRobot`], in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum RobotCommand {
    SwitchMode(Mode),
    Primitive(Primitive),
    Stop,
}

type StateFn = Box<dyn FnMut(u64) -> RobotStates + Send>;

/// Deterministic telemetry replay for tests and dry runs.
///
/// `states()` pops queued snapshots, then falls back to the generator (fed
/// the call count), then repeats the last snapshot. A MoveJ pins the joint
/// angles to its target so reach-waits complete.
pub struct ScriptedRobot {
    serial: String,
    queue: VecDeque<RobotStates>,
    generator: Option<StateFn>,
    last: RobotStates,
    mode: Mode,
    commands: Vec<RobotCommand>,
    calls: u64,
    follow_motion: bool,
    commanded_q: Option<[f64; 7]>,
    failing: bool,
}

impl ScriptedRobot {
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            queue: VecDeque::new(),
            generator: None,
            last: RobotStates::at_rest(),
            mode: Mode("NRT_CARTESIAN_MOTION_FORCE".to_string()),
            commands: Vec::new(),
            calls: 0,
            follow_motion: true,
            commanded_q: None,
            failing: false,
        }
    }

    pub fn with_states(serial: &str, states: Vec<RobotStates>) -> Self {
        let mut robot = Self::new(serial);
        robot.queue.extend(states);
        robot
    }

    /// Produce telemetry from the call index once the queue is drained.
    pub fn with_generator(serial: &str, generator: impl FnMut(u64) -> RobotStates + Send + 'static) -> Self {
        let mut robot = Self::new(serial);
        robot.generator = Some(Box::new(generator));
        robot
    }

    /// Leave joint angles untouched on MoveJ (the arm never arrives).
    pub fn ignore_motion(mut self) -> Self {
        self.follow_motion = false;
        self
    }

    /// Every call fails, as with a lost connection.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn push_states(&mut self, states: impl IntoIterator<Item = RobotStates>) {
        self.queue.extend(states);
    }

    pub fn commands(&self) -> &[RobotCommand] {
        &self.commands
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn check_link(&self) -> Result<()> {
        if self.failing {
            return Err(CalibError::Robot(format!("{}: link down", self.serial)));
        }
        Ok(())
    }
}

impl RobotClient for ScriptedRobot {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn states(&mut self) -> Result<RobotStates> {
        self.check_link()?;
        let index = self.calls;
        self.calls += 1;

        let mut states = match (self.queue.pop_front(), self.generator.as_mut()) {
            (Some(next), _) => next,
            (None, Some(generate)) => generate(index),
            (None, None) => self.last.clone(),
        };
        if let Some(q) = self.commanded_q {
            states.q = q;
        }
        self.last = states.clone();
        Ok(states)
    }

    fn mode(&mut self) -> Result<Mode> {
        self.check_link()?;
        Ok(self.mode.clone())
    }

    fn switch_mode(&mut self, mode: &Mode) -> Result<()> {
        self.check_link()?;
        self.mode = mode.clone();
        self.commands.push(RobotCommand::SwitchMode(mode.clone()));
        Ok(())
    }

    fn execute_primitive(&mut self, primitive: &Primitive) -> Result<()> {
        self.check_link()?;
        let Primitive::MoveJ { target_deg, .. } = primitive;
        if self.follow_motion {
            self.commanded_q = Some((*target_deg).map(f64::to_radians));
        }
        self.commands.push(RobotCommand::Primitive(primitive.clone()));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.check_link()?;
        self.commands.push(RobotCommand::Stop);
        Ok(())
    }
}
