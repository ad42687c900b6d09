mod common;

use market_core::{MarketState, Simulation, TickReport};

/// Steps the fixture run to the end, handing each tick's before and after
/// states to `check`.
fn for_each_tick(mut check: impl FnMut(&MarketState, &MarketState, &TickReport)) {
    let mut sim = Simulation::new(common::fixture_config()).expect("setup");
    loop {
        let before = sim.state().clone();
        let Some(report) = sim.step().expect("tick") else {
            break;
        };
        check(&before, sim.state(), &report);
    }
}

#[test]
fn requestable_only_ever_shrinks() {
    for_each_tick(|before, after, report| {
        for (now, was) in after
            .requestable
            .as_slice()
            .iter()
            .zip(before.requestable.as_slice())
        {
            assert!(now <= was, "tick {}: a request right reappeared", report.tick);
        }
        for (requestable, portable) in after
            .requestable
            .as_slice()
            .iter()
            .zip(after.portability.as_slice())
        {
            assert!(
                *requestable == 0 || *portable == 0,
                "tick {}: a granted right is still requestable",
                report.tick
            );
        }
    });
}

#[test]
fn granted_requests_become_portable() {
    for_each_tick(|_, after, report| {
        let negotiation = &report.negotiation;
        for request in &negotiation.granted {
            assert!(negotiation.requests.contains(request));
            assert_eq!(after.portability[request.index()], 1);
            assert_eq!(after.requestable[request.index()], 0);
        }
        let per_requester: u32 = negotiation.grants_per_requester.iter().sum();
        assert_eq!(per_requester as usize, negotiation.granted.len());
    });
}

#[test]
fn held_data_is_never_lost_without_deletion() {
    for_each_tick(|before, after, report| {
        assert!(report.scenario.is_none());
        for (now, was) in after
            .data_held
            .as_slice()
            .iter()
            .zip(before.data_held.as_slice())
        {
            assert!(now >= was, "tick {}: a held bit disappeared", report.tick);
        }
        assert!(after.data_value.as_slice().iter().all(|&v| v >= 0.0));
    });
}

#[test]
fn usage_is_recorded_on_the_ledger() {
    for_each_tick(|_, after, report| {
        let dims = after.dims();
        let tick = report.tick;
        for consumer in 0..dims.n_consumers {
            for category in 0..dims.n_categories {
                for firm in 0..dims.n_firms {
                    if after.usage[[consumer, category, firm]] == 0 {
                        continue;
                    }
                    for datatype in 0..dims.n_datatypes {
                        assert_eq!(
                            after.data_held[[tick, consumer, category, firm, datatype]],
                            after.category_datatype[[category, datatype]],
                        );
                    }
                }
            }
        }
    });
}

#[test]
fn choices_are_well_formed() {
    for_each_tick(|_, after, report| {
        let dims = after.dims();
        let mut used = 0;
        for consumer in 0..dims.n_consumers {
            for category in 0..dims.n_categories {
                let lane = after.usage.lane(&[consumer, category]);
                let picked: Vec<usize> = (0..dims.n_firms).filter(|&f| lane[f] == 1).collect();
                assert!(picked.len() <= 1);
                if let Some(&firm) = picked.first() {
                    used += 1;
                    assert!(after.alive[firm]);
                    assert!(after.has_product(firm, category));
                    assert_eq!(after.privacy_mask[[consumer, firm]], 1);
                }
            }
        }
        assert_eq!(used, report.choice.products_used);
    });
}

#[test]
fn dead_firms_are_fully_retired() {
    for_each_tick(|before, after, report| {
        after.check_dead_firms().expect("dead firms carry nothing");
        let dims = after.dims();
        for &firm in &report.deaths {
            assert!(before.alive[firm] || report.births.born.contains(&firm));
            assert!(!after.alive[firm]);
            assert!(!after.holds_any_product(firm));
            for category in 0..dims.n_categories {
                for other in 0..dims.n_firms {
                    for other_category in 0..dims.n_categories {
                        let rows = [
                            after.requestable.lane(&[firm, category, other, other_category]),
                            after.requestable.lane(&[other, other_category, firm, category]),
                            after.portability.lane(&[firm, category, other, other_category]),
                            after.portability.lane(&[other, other_category, firm, category]),
                        ];
                        assert!(rows.iter().all(|row| row.iter().all(|&bit| bit == 0)));
                    }
                }
            }
        }
        assert_eq!(
            after.n_alive() + report.deaths.len(),
            before.n_alive() + report.births.born.len()
        );
    });
}

#[test]
fn privacy_masks_are_never_restored() {
    for_each_tick(|before, after, _| {
        for (now, was) in after
            .privacy_mask
            .as_slice()
            .iter()
            .zip(before.privacy_mask.as_slice())
        {
            assert!(now <= was);
        }
    });
}
