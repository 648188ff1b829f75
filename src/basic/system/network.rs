use serde::{Deserialize, Serialize};

use crate::basic::error::ModelError;

fn default_one() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// A network node. Loads and shunts are per unit on the network base power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub name: String,
    /// Nominal voltage in kV.
    pub vn_kv: f64,
    /// Angle reference of the network.
    #[serde(default)]
    pub is_slack: bool,
    /// Voltage magnitude used by a slack bus without a voltage-controlling generator.
    #[serde(default = "default_one")]
    pub vm_pu: f64,
    #[serde(default)]
    pub p_load: f64,
    #[serde(default)]
    pub q_load: f64,
    #[serde(default)]
    pub g_shunt: f64,
    #[serde(default)]
    pub b_shunt: f64,
}

impl Bus {
    pub fn new(name: impl Into<String>, vn_kv: f64) -> Self {
        Self {
            name: name.into(),
            vn_kv,
            is_slack: false,
            vm_pu: 1.0,
            p_load: 0.0,
            q_load: 0.0,
            g_shunt: 0.0,
            b_shunt: 0.0,
        }
    }

    pub fn slack(mut self, vm_pu: f64) -> Self {
        self.is_slack = true;
        self.vm_pu = vm_pu;
        self
    }

    pub fn with_load(mut self, p: f64, q: f64) -> Self {
        self.p_load = p;
        self.q_load = q;
        self
    }

    pub fn with_shunt(mut self, g: f64, b: f64) -> Self {
        self.g_shunt = g;
        self.b_shunt = b;
        self
    }
}

/// A line or transformer in π-equivalent form, per unit.
///
/// `g`/`b` is the total shunt admittance, split evenly between both terminals.
/// The off-nominal ratio `tap` and the phase shift sit on the `from` side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub from: usize,
    pub to: usize,
    pub r: f64,
    pub x: f64,
    #[serde(default)]
    pub g: f64,
    #[serde(default)]
    pub b: f64,
    #[serde(default = "default_one")]
    pub tap: f64,
    #[serde(default)]
    pub shift_deg: f64,
    /// Nominal power in MVA of template-derived branches; used for loading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sn_mva: Option<f64>,
    #[serde(default = "default_true")]
    pub in_service: bool,
}

impl Branch {
    pub fn new(name: impl Into<String>, from: usize, to: usize, r: f64, x: f64) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            r,
            x,
            g: 0.0,
            b: 0.0,
            tap: 1.0,
            shift_deg: 0.0,
            sn_mva: None,
            in_service: true,
        }
    }

    pub fn with_shunt(mut self, g: f64, b: f64) -> Self {
        self.g = g;
        self.b = b;
        self
    }

    pub fn with_tap(mut self, tap: f64, shift_deg: f64) -> Self {
        self.tap = tap;
        self.shift_deg = shift_deg;
        self
    }

    pub fn with_rating(mut self, sn_mva: f64) -> Self {
        self.sn_mva = Some(sn_mva);
        self
    }

    /// Checks the branch against a network of `n_bus` buses.
    pub(crate) fn check(&self, n_bus: usize) -> Result<(), ModelError> {
        for bus in [self.from, self.to] {
            if bus >= n_bus {
                return Err(ModelError::UnknownBus {
                    element: "branch",
                    name: self.name.clone(),
                    bus,
                });
            }
        }
        if self.from == self.to {
            return Err(ModelError::SelfLoop(self.name.clone()));
        }
        let params = [self.r, self.x, self.g, self.b, self.tap, self.shift_deg];
        if params.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::invalid("branch", &self.name, "non-finite parameter"));
        }
        if self.r < 0.0 || self.x < 0.0 {
            return Err(ModelError::invalid(
                "branch",
                &self.name,
                format!("negative series impedance r={} x={}", self.r, self.x),
            ));
        }
        if self.r == 0.0 && self.x == 0.0 {
            return Err(ModelError::DegenerateBranch(self.name.clone()));
        }
        if self.tap <= 0.0 {
            return Err(ModelError::invalid(
                "branch",
                &self.name,
                format!("tap ratio must be positive, got {}", self.tap),
            ));
        }
        if let Some(sn) = self.sn_mva {
            if !(sn.is_finite() && sn > 0.0) {
                return Err(ModelError::invalid(
                    "branch",
                    &self.name,
                    format!("nominal power must be positive, got {sn}"),
                ));
            }
        }
        Ok(())
    }
}

/// A generator injection, per unit.
///
/// Setting `vm_setpoint` makes the generator voltage-controlling; its `q` is then
/// ignored and its reactive output is bounded by `[q_min, q_max]`. Missing
/// limits are unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    pub bus: usize,
    pub p: f64,
    #[serde(default)]
    pub q: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_setpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_max: Option<f64>,
    #[serde(default = "default_true")]
    pub in_service: bool,
}

impl Generator {
    pub fn new(name: impl Into<String>, bus: usize, p: f64) -> Self {
        Self {
            name: name.into(),
            bus,
            p,
            q: 0.0,
            vm_setpoint: None,
            q_min: None,
            q_max: None,
            in_service: true,
        }
    }

    pub fn with_voltage(mut self, vm_pu: f64) -> Self {
        self.vm_setpoint = Some(vm_pu);
        self
    }

    pub fn with_q(mut self, q: f64) -> Self {
        self.q = q;
        self
    }

    pub fn with_q_limits(mut self, q_min: f64, q_max: f64) -> Self {
        self.q_min = Some(q_min);
        self.q_max = Some(q_max);
        self
    }

    pub fn is_voltage_controlling(&self) -> bool {
        self.in_service && self.vm_setpoint.is_some()
    }

    pub fn q_min_or_unbounded(&self) -> f64 {
        self.q_min.unwrap_or(f64::NEG_INFINITY)
    }

    pub fn q_max_or_unbounded(&self) -> f64 {
        self.q_max.unwrap_or(f64::INFINITY)
    }

    fn check(&self, n_bus: usize) -> Result<(), ModelError> {
        if self.bus >= n_bus {
            return Err(ModelError::UnknownBus {
                element: "generator",
                name: self.name.clone(),
                bus: self.bus,
            });
        }
        if !(self.p.is_finite() && self.q.is_finite()) {
            return Err(ModelError::invalid("generator", &self.name, "non-finite injection"));
        }
        if let Some(vm) = self.vm_setpoint {
            if !(vm.is_finite() && vm > 0.0) {
                return Err(ModelError::invalid(
                    "generator",
                    &self.name,
                    format!("voltage setpoint must be positive, got {vm}"),
                ));
            }
        }
        if self.q_min.is_some_and(f64::is_nan) || self.q_max.is_some_and(f64::is_nan) {
            return Err(ModelError::invalid("generator", &self.name, "NaN reactive limit"));
        }
        if self.q_min_or_unbounded() > self.q_max_or_unbounded() {
            return Err(ModelError::invalid(
                "generator",
                &self.name,
                format!(
                    "q_min {} exceeds q_max {}",
                    self.q_min_or_unbounded(),
                    self.q_max_or_unbounded()
                ),
            ));
        }
        Ok(())
    }
}

/// A compiled network: every quantity already in per unit on `s_base_mva`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub name: String,
    pub s_base_mva: f64,
    pub buses: Vec<Bus>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub generators: Vec<Generator>,
}

impl Network {
    pub fn new(name: impl Into<String>, s_base_mva: f64) -> Self {
        Self {
            name: name.into(),
            s_base_mva,
            buses: Vec::new(),
            branches: Vec::new(),
            generators: Vec::new(),
        }
    }

    /// Appends a bus and returns its index.
    pub fn add_bus(&mut self, bus: Bus) -> usize {
        self.buses.push(bus);
        self.buses.len() - 1
    }

    pub fn add_branch(&mut self, branch: Branch) -> usize {
        self.branches.push(branch);
        self.branches.len() - 1
    }

    pub fn add_generator(&mut self, generator: Generator) -> usize {
        self.generators.push(generator);
        self.generators.len() - 1
    }

    pub fn n_bus(&self) -> usize {
        self.buses.len()
    }

    /// Structural checks on every element. Slack uniqueness is checked by
    /// [`classify_buses`](crate::basic::powerflow::init::classify_buses).
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.s_base_mva.is_finite() && self.s_base_mva > 0.0) {
            return Err(ModelError::InvalidBasePower(self.s_base_mva));
        }
        if self.buses.is_empty() {
            return Err(ModelError::EmptyNetwork);
        }
        for bus in &self.buses {
            let params = [bus.p_load, bus.q_load, bus.g_shunt, bus.b_shunt];
            if params.iter().any(|p| !p.is_finite()) {
                return Err(ModelError::invalid("bus", &bus.name, "non-finite parameter"));
            }
            if !(bus.vn_kv.is_finite() && bus.vn_kv > 0.0) {
                return Err(ModelError::invalid(
                    "bus",
                    &bus.name,
                    format!("nominal voltage must be positive, got {}", bus.vn_kv),
                ));
            }
            if !(bus.vm_pu.is_finite() && bus.vm_pu > 0.0) {
                return Err(ModelError::invalid(
                    "bus",
                    &bus.name,
                    format!("voltage magnitude must be positive, got {}", bus.vm_pu),
                ));
            }
        }
        let n = self.n_bus();
        self.branches.iter().try_for_each(|br| br.check(n))?;
        self.generators.iter().try_for_each(|g| g.check(n))?;
        Ok(())
    }
}
