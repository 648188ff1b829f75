//! Small reference networks.

use crate::basic::system::{Branch, Bus, Generator, Network};

/// Three buses joined by two transformers, with a voltage-controlled generator
/// at the low-voltage end.
///
/// POI (100 kV, slack at 1.0 pu) feeds B_MV_M32 (10 kV) through a 100 MVA,
/// 8 %, X/R 40 unit; B_MV_M32 feeds B_LV_M32 (0.6 kV) through a 5 MVA, 6 %,
/// X/R 20 unit. Magnetizing losses are included, tap regulators are not.
/// Generator M32 injects 4.2 MW and holds 1.025 pu within ±250 Mvar.
/// Per unit on 100 MVA; the magnitudes solve to 1.000, 1.001 and 1.025 pu.
pub fn pv_three_bus() -> Network {
    let mut net = Network::new("test_pv_1", 100.0);
    let poi = net.add_bus(Bus::new("POI", 100.0).slack(1.0));
    let mv = net.add_bus(Bus::new("B_MV_M32", 10.0));
    let lv = net.add_bus(Bus::new("B_LV_M32", 0.6));

    net.add_generator(Generator::new("Utility", poi, 0.0).with_voltage(1.0));
    net.add_generator(
        Generator::new("M32", lv, 0.042)
            .with_voltage(1.025)
            .with_q_limits(-2.5, 2.5),
    );

    net.add_branch(
        Branch::new("X_C3", poi, mv, 0.0019993752928162455, 0.07997501171264981)
            .with_shunt(0.00125, -0.004841229182759271)
            .with_rating(100.0),
    );
    net.add_branch(
        Branch::new("X_M32", mv, lv, 0.05992514033267068, 1.1985028066534138)
            .with_shunt(6.25e-05, -0.00024206145913796356)
            .with_rating(5.0),
    );
    net
}

/// [`pv_three_bus`] with other reactive limits on generator M32.
pub fn pv_three_bus_with_q_limits(q_min: f64, q_max: f64) -> Network {
    let mut net = pv_three_bus();
    if let Some(m32) = net.generators.iter_mut().find(|g| g.name == "M32") {
        m32.q_min = Some(q_min);
        m32.q_max = Some(q_max);
    }
    net
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cases_are_valid() {
        assert!(pv_three_bus().validate().is_ok());
        let net = pv_three_bus_with_q_limits(0.05, 0.5);
        assert_eq!(net.generators[1].q_min, Some(0.05));
        assert_eq!(net.generators[1].q_max, Some(0.5));
    }
}
