use crate::data::{
    Assignment, Group, Metric, Metrics, OptimizeRequest, OptimizeResponse, Status,
};
use good_lp::variable;
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, default_solver,
};
use itertools::Itertools;
use log::{info, trace};
use std::collections::HashSet;
use std::time::Instant;

/// Fixed multiplier that lifts the fractional penalty weight into the
/// integer objective; reported objective values are divided by it again.
/// `lambda` is truncated after scaling, so weights are honored to 1/1000.
const SCALING_FACTOR: i64 = 1000;

/// Wall-clock budget for one solve, enforced by the solver itself.
const TIME_LIMIT_SECONDS: f64 = 30.0;

/// One feasible (group, room, slot) triple and its decision variable.
/// `penalty_seats` is the static per-triple penalty amount; when it is
/// non-zero, `penalty_var` carries the reified penalty contribution.
struct Candidate {
    group: usize,
    room: usize,
    slot: usize,
    chosen: Variable,
    penalty_seats: u32,
    penalty_var: Option<Variable>,
}

/// Assigns groups to rooms and timeslots with the HiGHS ILP solver,
/// maximizing placed enrollment minus the weighted underutilization penalty.
///
/// Domain-level failures (insufficient data, solver without a solution) are
/// reported inside the response; `Err` is reserved for objective bounds that
/// overflow the integer encoding, which marks the request as unrecoverable.
pub fn optimize(request: &OptimizeRequest) -> Result<OptimizeResponse, String> {
    let start_time = Instant::now();
    let params = &request.parameters;

    // partition groups by whether any room can hold them at all
    let max_capacity = request.rooms.iter().map(|r| r.capacity).max().unwrap_or(0);
    let (assignable, impossible): (Vec<&Group>, Vec<&Group>) = request
        .groups
        .iter()
        .partition(|g| g.enrollment <= max_capacity);

    if request.rooms.is_empty() || assignable.is_empty() || request.slots.is_empty() {
        info!("Rejecting request before model construction: insufficient data.");
        return Ok(OptimizeResponse {
            status: Status::Error,
            message: "Insufficient data. Rooms, assignable groups and timeslots are required for optimization.".to_string(),
            assignments: Vec::new(),
            metrics: Metrics::empty(),
            unassigned_groups: all_group_names(request),
            parameters_used: params.clone(),
        });
    }

    check_objective_bounds(request, &assignable)?;

    // model setup
    info!(
        "Setting up ILP model with {} assignable groups ({} impossible), {} rooms, and {} timeslots...",
        assignable.len(),
        impossible.len(),
        request.rooms.len(),
        request.slots.len()
    );
    let mut problem = ProblemVariables::new();

    // x_ijt = 1 if group i is placed in room j at slot t, 0 otherwise.
    // Triples where the group does not fit the room are never generated.
    let mut feasible_triples = Vec::new();
    for (i, group) in assignable.iter().enumerate() {
        for (j, room) in request.rooms.iter().enumerate() {
            if group.enrollment <= room.capacity {
                for t in 0..request.slots.len() {
                    feasible_triples.push((i, j, t));
                }
            }
        }
    }
    trace!(
        "Generated {} decision variables out of a theoretical maximum of {}.",
        feasible_triples.len(),
        assignable.len() * request.rooms.len() * request.slots.len()
    );

    let chosen_vars = problem.add_vector(variable().binary(), feasible_triples.len());
    let mut candidates = Vec::with_capacity(feasible_triples.len());
    for (&(i, j, t), &chosen) in feasible_triples.iter().zip(&chosen_vars) {
        let room = &request.rooms[j];
        let penalty_seats = penalty_seats(room.capacity, assignable[i].enrollment, params.delta);
        // the "underutilized" indicator is a static property of the triple,
        // so the reified penalty reduces to one linked variable per
        // penalized triple, forced to 0 whenever the assignment is not chosen
        let penalty_var = (penalty_seats > 0)
            .then(|| problem.add(variable().integer().min(0.0).max(room.capacity as f64)));
        candidates.push(Candidate {
            group: i,
            room: j,
            slot: t,
            chosen,
            penalty_seats,
            penalty_var,
        });
    }

    // objective: maximize scaled enrollment benefit minus weighted penalty
    let benefit: Expression = candidates
        .iter()
        .map(|c| assignable[c.group].enrollment as f64 * c.chosen)
        .sum();
    let total_penalty: Expression = candidates.iter().filter_map(|c| c.penalty_var).sum();
    let scaled_lambda = (params.lambda * SCALING_FACTOR as f64) as i64;
    let objective = SCALING_FACTOR as f64 * benefit - scaled_lambda as f64 * total_penalty;
    info!(
        "Objective defined: scaled enrollment benefit minus {} x underutilization penalty.",
        scaled_lambda
    );

    let mut model = problem
        .maximise(objective.clone())
        .using(default_solver)
        .set_option("threads", 1) // limit to 1 thread for reproducibility
        .set_option("random_seed", 1234) // set seed for reproducibility
        .set_option("time_limit", TIME_LIMIT_SECONDS)
        .set_option("log_to_console", "false");

    // each group is placed at most once
    info!("Adding 'group placed at most once' constraints...");
    for i in 0..assignable.len() {
        let group_vars: Vec<Variable> = candidates
            .iter()
            .filter(|c| c.group == i)
            .map(|c| c.chosen)
            .collect();
        // a group without candidates is reconciled in reporting, not here
        if !group_vars.is_empty() {
            let placed_at_most_once: Expression = group_vars.into_iter().sum();
            model.add_constraint(constraint!(placed_at_most_once <= 1));
        }
    }

    // no (room, slot) double-booking
    info!("Adding 'no room double-booking' constraints...");
    for j in 0..request.rooms.len() {
        for t in 0..request.slots.len() {
            let room_occupied: Expression = candidates
                .iter()
                .filter(|c| c.room == j && c.slot == t)
                .map(|c| c.chosen)
                .sum();
            model.add_constraint(constraint!(room_occupied <= 1));
        }
    }

    // tie each penalty variable to its decision variable
    info!("Adding penalty linking constraints...");
    for c in &candidates {
        if let Some(penalty) = c.penalty_var {
            model.add_constraint(constraint!(penalty == c.penalty_seats as f64 * c.chosen));
        }
    }

    // solve
    info!("Starting ILP solver...");
    let solution = match model.solve() {
        Ok(s) => s,
        Err(e) => {
            // the empty assignment is always feasible, so this is either a
            // time budget expiry with no incumbent or an encoding defect
            info!("Solver finished without a usable solution: {}", e);
            return Ok(OptimizeResponse {
                status: Status::Error,
                message: format!(
                    "The solver could not find an optimal or feasible solution. Status: {}",
                    e
                ),
                assignments: Vec::new(),
                metrics: Metrics::unavailable(),
                unassigned_groups: all_group_names(request),
                parameters_used: params.clone(),
            });
        }
    };
    info!("Solution found in {:.2?}", start_time.elapsed());

    // translate chosen variables back into domain assignments; the reported
    // penalty is recomputed from the same rule the encoding used, never read
    // back from the scaled solver internals
    let mut assignments = Vec::new();
    let mut assigned_groups = HashSet::new();
    let mut rooms_used = HashSet::new();
    let mut utilization_sum = 0.0;
    let mut total_reported_penalty: u64 = 0;
    for c in &candidates {
        if solution.value(c.chosen) > 0.9 {
            let group = assignable[c.group];
            let room = &request.rooms[c.room];
            let utilization = group.enrollment as f64 / room.capacity as f64 * 100.0;
            let penalty_applied = penalty_seats(room.capacity, group.enrollment, params.delta);

            assignments.push(Assignment {
                group: group.name.clone(),
                room: room.id.clone(),
                slot: request.slots[c.slot].clone(),
                enrollment: group.enrollment,
                capacity: room.capacity,
                utilization_pct: round2(utilization),
                penalty_applied,
            });
            assigned_groups.insert(c.group);
            rooms_used.insert(room.id.as_str());
            utilization_sum += utilization;
            total_reported_penalty += penalty_applied as u64;
        }
    }
    assignments.sort_by(|a, b| (&a.group, &a.room, &a.slot).cmp(&(&b.group, &b.room, &b.slot)));

    let unassigned_groups: Vec<String> = impossible
        .iter()
        .map(|g| g.name.clone())
        .chain(
            assignable
                .iter()
                .enumerate()
                .filter(|(i, _)| !assigned_groups.contains(i))
                .map(|(_, g)| g.name.clone()),
        )
        .sorted()
        .dedup()
        .collect();

    let avg_utilization = if assignments.is_empty() {
        0.0
    } else {
        utilization_sum / assignments.len() as f64
    };
    let objective_value = objective.eval_with(&solution) / SCALING_FACTOR as f64;

    Ok(OptimizeResponse {
        status: Status::Success,
        message: "Optimization completed successfully.".to_string(),
        assignments,
        metrics: Metrics {
            objective_value: Some(Metric::Float(round2(objective_value))),
            avg_utilization: Some(Metric::Float(round2(avg_utilization))),
            total_penalty: Some(Metric::Int(total_reported_penalty)),
            rooms_used: Some(rooms_used.len() as u32),
        },
        unassigned_groups,
        parameters_used: params.clone(),
    })
}

/// Seats counted against an assignment of a group to a room, under the
/// underutilization rule: the full number of empty seats when it exceeds
/// `floor(delta * capacity)`, zero otherwise. The encoding and the reporting
/// path both use this function, so they can never disagree near the boundary.
fn penalty_seats(capacity: u32, enrollment: u32, delta: f64) -> u32 {
    let empty_seats = capacity - enrollment;
    let threshold = (delta * capacity as f64) as u32;
    if empty_seats > threshold { empty_seats } else { 0 }
}

/// Declared upper bounds on the scaled objective terms must fit the integer
/// encoding; an overflow here is a sizing defect, not a solvable request.
fn check_objective_bounds(request: &OptimizeRequest, assignable: &[&Group]) -> Result<(), String> {
    let benefit_bound: u64 = assignable.iter().map(|g| g.enrollment as u64).sum();
    let penalty_bound: u64 = request
        .rooms
        .iter()
        .map(|r| r.capacity as u64)
        .sum::<u64>()
        .saturating_mul(request.slots.len() as u64);
    let scaled_lambda = (request.parameters.lambda * SCALING_FACTOR as f64) as u64;

    let scaled_benefit = benefit_bound.checked_mul(SCALING_FACTOR as u64);
    let scaled_penalty = scaled_lambda.checked_mul(penalty_bound);
    match (scaled_benefit, scaled_penalty) {
        (Some(b), Some(p)) if b <= i64::MAX as u64 && p <= i64::MAX as u64 => Ok(()),
        _ => Err(
            "Objective bounds exceed the integer encoding range; the instance is too large for the configured scaling."
                .to_string(),
        ),
    }
}

fn all_group_names(request: &OptimizeRequest) -> Vec<String> {
    request
        .groups
        .iter()
        .map(|g| g.name.clone())
        .sorted()
        .dedup()
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Group, Parameters, Room};

    fn request(
        rooms: &[(&str, u32)],
        groups: &[(&str, u32)],
        slots: &[&str],
        delta: f64,
        lambda: f64,
    ) -> OptimizeRequest {
        OptimizeRequest {
            rooms: rooms
                .iter()
                .map(|&(id, capacity)| Room {
                    id: id.to_string(),
                    capacity,
                })
                .collect(),
            groups: groups
                .iter()
                .map(|&(name, enrollment)| Group {
                    name: name.to_string(),
                    enrollment,
                })
                .collect(),
            parameters: Parameters { delta, lambda },
            slots: slots.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn total_penalty(response: &OptimizeResponse) -> u64 {
        match response.metrics.total_penalty {
            Some(Metric::Int(p)) => p,
            other => panic!("expected a numeric total penalty, got {:?}", other),
        }
    }

    fn objective_value(response: &OptimizeResponse) -> f64 {
        match response.metrics.objective_value {
            Some(Metric::Float(z)) => z,
            other => panic!("expected a numeric objective value, got {:?}", other),
        }
    }

    #[test]
    fn comfortable_fit_is_placed_without_penalty() {
        let req = request(&[("A-101", 30)], &[("Algebra", 20)], &["Mon 8-10"], 0.5, 0.0);
        let response = optimize(&req).unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(response.assignments.len(), 1);
        let assignment = &response.assignments[0];
        assert_eq!(assignment.group, "Algebra");
        assert_eq!(assignment.room, "A-101");
        assert_eq!(assignment.slot, "Mon 8-10");
        // 10 empty seats, threshold floor(0.5 * 30) = 15: no penalty
        assert!((assignment.utilization_pct - 66.67).abs() < 1e-9);
        assert_eq!(assignment.penalty_applied, 0);
        assert!(response.unassigned_groups.is_empty());
        assert!((objective_value(&response) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn dominant_penalty_leaves_group_unplaced() {
        // 25 empty seats over threshold 3; scaled penalty 25000 outweighs
        // the scaled benefit 5000, so the optimum assigns nothing
        let req = request(&[("A-101", 30)], &[("Seminar", 5)], &["Mon 8-10"], 0.1, 1.0);
        let response = optimize(&req).unwrap();

        assert_eq!(response.status, Status::Success);
        assert!(response.assignments.is_empty());
        assert_eq!(response.unassigned_groups, vec!["Seminar".to_string()]);
        assert!(objective_value(&response).abs() < 1e-9);
        assert_eq!(total_penalty(&response), 0);
        assert_eq!(response.metrics.avg_utilization, Some(Metric::Float(0.0)));
        assert_eq!(response.metrics.rooms_used, Some(0));
    }

    #[test]
    fn oversized_group_is_filtered_but_others_are_placed() {
        let req = request(
            &[("A-101", 30)],
            &[("Lecture", 200), ("Algebra", 25)],
            &["Mon 8-10"],
            0.5,
            0.0,
        );
        let response = optimize(&req).unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(response.assignments.len(), 1);
        assert_eq!(response.assignments[0].group, "Algebra");
        assert_eq!(response.unassigned_groups, vec!["Lecture".to_string()]);
    }

    #[test]
    fn missing_rooms_or_slots_is_rejected_before_solving() {
        let no_rooms = request(&[], &[("Algebra", 20), ("Biology", 10)], &["Mon"], 0.2, 1.0);
        let response = optimize(&no_rooms).unwrap();
        assert_eq!(response.status, Status::Error);
        assert!(response.assignments.is_empty());
        assert_eq!(
            response.unassigned_groups,
            vec!["Algebra".to_string(), "Biology".to_string()]
        );
        assert_eq!(response.metrics, Metrics::empty());

        let no_slots = request(&[("A-101", 30)], &[("Algebra", 20)], &[], 0.2, 1.0);
        assert_eq!(optimize(&no_slots).unwrap().status, Status::Error);

        // every group too large for every room: nothing assignable
        let no_assignable = request(&[("A-101", 10)], &[("Algebra", 20)], &["Mon"], 0.2, 1.0);
        let response = optimize(&no_assignable).unwrap();
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.unassigned_groups, vec!["Algebra".to_string()]);
    }

    #[test]
    fn complete_matching_places_every_group() {
        let req = request(
            &[("A-101", 30), ("B-202", 40)],
            &[("Algebra", 20), ("Biology", 25)],
            &["Mon 8-10"],
            0.5,
            0.0,
        );
        let response = optimize(&req).unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(response.assignments.len(), 2);
        assert!(response.unassigned_groups.is_empty());
        assert_eq!(response.metrics.rooms_used, Some(2));
        // total placed enrollment is the whole objective when lambda is 0
        assert!((objective_value(&response) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn one_room_one_slot_places_only_one_group() {
        let req = request(
            &[("A-101", 30)],
            &[("Algebra", 20), ("Biology", 25)],
            &["Mon 8-10"],
            0.5,
            0.0,
        );
        let response = optimize(&req).unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(response.assignments.len(), 1);
        // the larger group wins: benefit is total enrollment placed
        assert_eq!(response.assignments[0].group, "Biology");
        assert_eq!(response.unassigned_groups, vec!["Algebra".to_string()]);
    }

    #[test]
    fn assignments_respect_capacity_and_uniqueness() {
        let req = request(
            &[("A-101", 25), ("B-202", 40), ("C-303", 15)],
            &[
                ("Algebra", 20),
                ("Biology", 35),
                ("Chemistry", 12),
                ("Drama", 18),
            ],
            &["Mon 8-10", "Mon 10-12"],
            0.3,
            0.5,
        );
        let response = optimize(&req).unwrap();
        assert_eq!(response.status, Status::Success);

        let mut seen_groups = HashSet::new();
        let mut seen_room_slots = HashSet::new();
        for a in &response.assignments {
            assert!(a.enrollment <= a.capacity);
            assert!(seen_groups.insert(a.group.clone()));
            assert!(seen_room_slots.insert((a.room.clone(), a.slot.clone())));
        }

        // assigned and unassigned partition the input group set
        let mut all_names: Vec<String> = response
            .assignments
            .iter()
            .map(|a| a.group.clone())
            .chain(response.unassigned_groups.iter().cloned())
            .collect();
        all_names.sort();
        let mut expected: Vec<String> = req.groups.iter().map(|g| g.name.clone()).collect();
        expected.sort();
        assert_eq!(all_names, expected);
    }

    #[test]
    fn higher_lambda_never_increases_total_penalty() {
        let rooms = [("A-101", 100), ("B-202", 20)];
        let groups = [("Algebra", 10), ("Biology", 18)];
        let slots = ["Mon 8-10"];

        let lenient = optimize(&request(&rooms, &groups, &slots, 0.0, 0.05)).unwrap();
        let strict = optimize(&request(&rooms, &groups, &slots, 0.0, 10.0)).unwrap();
        assert_eq!(lenient.status, Status::Success);
        assert_eq!(strict.status, Status::Success);

        assert!(total_penalty(&strict) <= total_penalty(&lenient));
    }

    #[test]
    fn reported_penalty_matches_threshold_rule() {
        // 12 empty seats, threshold floor(0.25 * 40) = 10: penalized
        let req = request(&[("B-202", 40)], &[("Chemistry", 28)], &["Mon"], 0.25, 0.001);
        let response = optimize(&req).unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(response.assignments.len(), 1);
        assert_eq!(response.assignments[0].penalty_applied, 12);
        assert_eq!(total_penalty(&response), 12);
        // scaled: 28000 benefit minus trunc(0.001 * 1000) * 12 = 27988
        assert!((objective_value(&response) - 27.99).abs() < 1e-9);
    }

    #[test]
    fn duplicate_group_names_are_reported_once() {
        let req = request(
            &[("A-101", 10)],
            &[("Algebra", 50), ("Algebra", 60)],
            &["Mon"],
            0.2,
            1.0,
        );
        let response = optimize(&req).unwrap();
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.unassigned_groups, vec!["Algebra".to_string()]);
    }
}
