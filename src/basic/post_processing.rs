use std::fmt;

use tabled::{Table, Tabled, settings::Style};

use super::powerflow::result_extract::PowerFlowResult;
use super::system::Network;

/// A float printed with a fixed number of decimal places.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

/// Table row for bus results.
#[derive(Debug, Tabled)]
#[allow(non_snake_case)]
pub(crate) struct BusResTable {
    pub(crate) Bus: String,
    pub(crate) Type: String,
    pub(crate) Vm: FloatWrapper,
    pub(crate) Va: FloatWrapper,
    pub(crate) P_mw: FloatWrapper,
    pub(crate) Q_mvar: FloatWrapper,
}

/// Table row for branch results, powers in MW/MVAr and currents in kA.
#[derive(Debug, Tabled)]
pub(crate) struct LineResTable {
    pub(crate) name: String,
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) p_from_mw: FloatWrapper,
    pub(crate) q_from_mvar: FloatWrapper,
    pub(crate) p_to_mw: FloatWrapper,
    pub(crate) q_to_mvar: FloatWrapper,
    pub(crate) pl_mw: FloatWrapper,
    pub(crate) ql_mvar: FloatWrapper,
    pub(crate) i_from_ka: FloatWrapper,
    pub(crate) i_to_ka: FloatWrapper,
    #[tabled(display_with = "display_loading")]
    pub(crate) loading_percent: Option<FloatWrapper>,
}

fn display_loading(loading: &Option<FloatWrapper>) -> String {
    loading.map_or_else(|| "-".to_owned(), |l| l.to_string())
}

/// Markdown rendering of a solved network.
pub trait PostProcessing {
    fn bus_table(&self, net: &Network) -> String;
    fn branch_table(&self, net: &Network) -> String;
    fn print_res(&self, net: &Network);
}

impl PostProcessing for PowerFlowResult {
    fn bus_table(&self, net: &Network) -> String {
        let rows = net.buses.iter().enumerate().map(|(i, bus)| {
            let s = self.s_calc[i] * net.s_base_mva;
            BusResTable {
                Bus: bus.name.clone(),
                Type: self.bus_types[i].to_string(),
                Vm: FloatWrapper::new(self.v[i].norm(), 5),
                Va: FloatWrapper::new(self.v[i].arg().to_degrees(), 5),
                P_mw: FloatWrapper::new(s.re, 5),
                Q_mvar: FloatWrapper::new(s.im, 5),
            }
        });
        Table::new(rows).with(Style::markdown()).to_string()
    }

    fn branch_table(&self, net: &Network) -> String {
        let sb = net.s_base_mva;
        // base current of a terminal in kA
        let i_base = |bus: usize| sb / (3f64.sqrt() * net.buses[bus].vn_kv);
        let rows = net
            .branches
            .iter()
            .zip(&self.branches)
            .map(|(br, flow)| LineResTable {
                name: br.name.clone(),
                from: br.from,
                to: br.to,
                p_from_mw: FloatWrapper::new(flow.s_from.re * sb, 3),
                q_from_mvar: FloatWrapper::new(flow.s_from.im * sb, 3),
                p_to_mw: FloatWrapper::new(flow.s_to.re * sb, 3),
                q_to_mvar: FloatWrapper::new(flow.s_to.im * sb, 3),
                pl_mw: FloatWrapper::new(flow.loss.re * sb, 3),
                ql_mvar: FloatWrapper::new(flow.loss.im * sb, 3),
                i_from_ka: FloatWrapper::new(flow.i_from.norm() * i_base(br.from), 3),
                i_to_ka: FloatWrapper::new(flow.i_to.norm() * i_base(br.to), 3),
                loading_percent: flow.loading_percent.map(|l| FloatWrapper::new(l, 1)),
            });
        Table::new(rows).with(Style::markdown()).to_string()
    }

    fn print_res(&self, net: &Network) {
        println!("{}", self.bus_table(net));
        println!();
        println!("{}", self.branch_table(net));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::powerflow::config::PowerFlowConfig;
    use crate::basic::powerflow::systems::run_pf_with_solver;
    use crate::basic::solver::DenseSolver;
    use crate::testcases::pv_three_bus;

    #[test]
    fn test_float_wrapper_precision() {
        assert_eq!(FloatWrapper::new(1.23456, 2).to_string(), "1.23");
        assert_eq!(format!("{:?}", FloatWrapper::new(-1.26, 1)), "-1.3");
    }

    #[test]
    fn test_tables_list_every_element() {
        let net = pv_three_bus();
        let res =
            run_pf_with_solver::<DenseSolver>(&net, &PowerFlowConfig::default(), None, None)
                .unwrap();
        let buses = res.bus_table(&net);
        for bus in &net.buses {
            assert!(buses.contains(&bus.name), "{buses}");
        }
        assert!(buses.contains("Slack"));
        assert!(buses.contains("1.02500"));

        let branches = res.branch_table(&net);
        for br in &net.branches {
            assert!(branches.contains(&br.name), "{branches}");
        }
        assert!(branches.contains("loading_percent"));
    }
}
