use std::collections::BTreeSet;

use runway_types::{
    AgentSpecification, AttemptOutcome, BackendId, ExecutionPolicy, HealthState, StepKind,
};

/// Read-only view of one registered adapter at ordering time.
#[derive(Debug, Clone, Copy)]
pub struct CandidateView<'a> {
    pub id: &'a BackendId,
    pub capabilities: &'a BTreeSet<StepKind>,
    pub health: HealthState,
    pub registration: usize,
}

/// Registration indices of adapters able to run `spec`, best first.
///
/// Ordered by preference position, then health rank, then registration order.
/// Adapters missing from `runtime_preferences` rank after every listed one.
pub fn order_candidates(spec: &AgentSpecification, views: &[CandidateView<'_>]) -> Vec<usize> {
    let required = spec.required_kinds();
    let mut eligible: Vec<&CandidateView<'_>> = views
        .iter()
        .filter(|v| required.is_subset(v.capabilities))
        .collect();
    eligible.sort_by_key(|v| {
        let preference = spec
            .runtime_preferences
            .iter()
            .position(|p| p == v.id)
            .unwrap_or(usize::MAX);
        (preference, v.health.rank(), v.registration)
    });
    eligible.iter().map(|v| v.registration).collect()
}

/// When a sequential plan moves on to the next candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    OnAnyFailure,
    /// The first candidate hands over only after an unavailability-class outcome.
    /// From the second candidate on, any failure moves to the next one.
    FirstOnUnavailable,
}

impl Advance {
    /// Whether the plan tries the next candidate after `outcome` at `position`.
    pub fn moves_on(self, position: usize, outcome: &AttemptOutcome) -> bool {
        match self {
            Advance::OnAnyFailure => true,
            Advance::FirstOnUnavailable => position > 0 || outcome.warrants_fallback(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptPlan {
    Sequential { order: Vec<usize>, advance: Advance },
    Concurrent { set: Vec<usize> },
}

impl AttemptPlan {
    pub fn len(&self) -> usize {
        match self {
            AttemptPlan::Sequential { order, .. } => order.len(),
            AttemptPlan::Concurrent { set } => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns an ordered candidate list into the attempts a policy allows.
///
/// `ordered` pairs each registration index with its current health. `turn` is the
/// round-robin counter used by `LoadBalance`.
pub fn plan_attempts(
    policy: ExecutionPolicy,
    ordered: &[(usize, HealthState)],
    turn: usize,
) -> AttemptPlan {
    let all: Vec<usize> = ordered.iter().map(|(idx, _)| *idx).collect();
    match policy {
        ExecutionPolicy::PrimaryOnly => AttemptPlan::Sequential {
            order: all.into_iter().take(1).collect(),
            advance: Advance::OnAnyFailure,
        },
        ExecutionPolicy::Failover => AttemptPlan::Sequential {
            order: all,
            advance: Advance::OnAnyFailure,
        },
        ExecutionPolicy::LoadBalance => {
            let healthy: Vec<usize> = ordered
                .iter()
                .filter(|(_, h)| *h == HealthState::Healthy)
                .map(|(idx, _)| *idx)
                .collect();
            if healthy.is_empty() {
                return AttemptPlan::Sequential {
                    order: all,
                    advance: Advance::OnAnyFailure,
                };
            }
            let chosen = healthy[turn % healthy.len()];
            let mut order = vec![chosen];
            order.extend(all.into_iter().filter(|idx| *idx != chosen));
            AttemptPlan::Sequential {
                order,
                advance: Advance::FirstOnUnavailable,
            }
        }
        ExecutionPolicy::Redundant { fanout } => AttemptPlan::Concurrent {
            set: all.into_iter().take(fanout.max(1)).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_test_utils::{spec_preferring, spec_with_kinds};
    use HealthState::*;

    struct Reg {
        id: BackendId,
        caps: BTreeSet<StepKind>,
        health: HealthState,
    }

    fn reg(id: &str, health: HealthState) -> Reg {
        Reg {
            id: BackendId::new(id),
            caps: StepKind::all(),
            health,
        }
    }

    fn views(regs: &[Reg]) -> Vec<CandidateView<'_>> {
        regs.iter()
            .enumerate()
            .map(|(i, r)| CandidateView {
                id: &r.id,
                capabilities: &r.caps,
                health: r.health,
                registration: i,
            })
            .collect()
    }

    #[test]
    fn preference_order_wins_over_health() {
        let regs = [reg("local", Degraded), reg("docker", Healthy), reg("n8n", Healthy)];
        let spec = spec_preferring("a", &["local", "docker"]);
        assert_eq!(order_candidates(&spec, &views(&regs)), vec![0, 1, 2]);
    }

    #[test]
    fn unlisted_adapters_sort_by_health_then_registration() {
        let regs = [
            reg("a", Unavailable),
            reg("b", Healthy),
            reg("c", Degraded),
            reg("d", Healthy),
        ];
        let spec = spec_preferring("x", &[]);
        assert_eq!(order_candidates(&spec, &views(&regs)), vec![1, 3, 2, 0]);
    }

    #[test]
    fn adapters_lacking_capabilities_are_not_candidates() {
        let mut regs = [reg("local", Healthy), reg("n8n", Healthy)];
        regs[1].caps = [StepKind::HttpRequest].into_iter().collect();
        let spec = spec_with_kinds("x", &[StepKind::HttpRequest, StepKind::GenerateContent]);
        assert_eq!(order_candidates(&spec, &views(&regs)), vec![0]);
    }

    #[test]
    fn primary_only_keeps_first() {
        let plan = plan_attempts(
            ExecutionPolicy::PrimaryOnly,
            &[(2, Healthy), (0, Healthy)],
            0,
        );
        assert_eq!(
            plan,
            AttemptPlan::Sequential {
                order: vec![2],
                advance: Advance::OnAnyFailure
            }
        );
    }

    #[test]
    fn load_balance_rotates_over_healthy_candidates() {
        let ordered = [(0, Healthy), (1, Degraded), (2, Healthy)];
        let first = plan_attempts(ExecutionPolicy::LoadBalance, &ordered, 0);
        let second = plan_attempts(ExecutionPolicy::LoadBalance, &ordered, 1);
        assert_eq!(
            first,
            AttemptPlan::Sequential {
                order: vec![0, 1, 2],
                advance: Advance::FirstOnUnavailable
            }
        );
        assert_eq!(
            second,
            AttemptPlan::Sequential {
                order: vec![2, 0, 1],
                advance: Advance::FirstOnUnavailable
            }
        );
    }

    #[test]
    fn load_balance_without_healthy_candidates_is_failover() {
        let ordered = [(0, Degraded), (1, Unavailable)];
        assert_eq!(
            plan_attempts(ExecutionPolicy::LoadBalance, &ordered, 7),
            plan_attempts(ExecutionPolicy::Failover, &ordered, 7)
        );
    }

    #[test]
    fn load_balance_gates_only_the_chosen_candidate() {
        let business = AttemptOutcome::Failure {
            reason: runway_types::FailureReason::ExecutionFailure {
                message: "bad".into(),
            },
        };
        let advance = Advance::FirstOnUnavailable;
        assert!(!advance.moves_on(0, &business));
        assert!(advance.moves_on(0, &AttemptOutcome::Timeout));
        assert!(advance.moves_on(1, &business));
        assert!(advance.moves_on(2, &business));
        assert!(Advance::OnAnyFailure.moves_on(0, &business));
    }

    #[test]
    fn redundant_takes_top_n() {
        let ordered = [(3, Healthy), (1, Healthy), (0, Degraded)];
        assert_eq!(
            plan_attempts(ExecutionPolicy::Redundant { fanout: 2 }, &ordered, 0),
            AttemptPlan::Concurrent { set: vec![3, 1] }
        );
        assert_eq!(
            plan_attempts(ExecutionPolicy::Redundant { fanout: 0 }, &ordered, 0).len(),
            1
        );
    }
}
