mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::write_commands;
use predicates::prelude::*;
use std::process::Command;
use tempfile::NamedTempFile;

fn run(rows: &[[&str; 5]]) -> assert_cmd::assert::Assert {
    let file = NamedTempFile::new().unwrap();
    write_commands(file.path(), rows).unwrap();

    let mut cmd = Command::new(cargo_bin!("gigmarket"));
    cmd.arg(file.path());
    cmd.assert()
}

#[test]
fn test_posting_debits_fee_and_escrow() {
    // Balance 1000, posting fee 50, payment 200: the poster keeps 750 and
    // the task sits open with its escrow held
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
    ])
    .success()
    .stdout(predicate::str::contains("alice,750.00"))
    .stdout(predicate::str::contains("1,Build a wall,alice,,200.00,open"));
}

#[test]
fn test_approval_pays_worker_minus_commission() {
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["claim", "bob", "1", "", ""],
        ["submit", "bob", "1", "", ""],
        ["approve", "alice", "1", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("alice,750.00"))
    .stdout(predicate::str::contains("bob,190.00"))
    .stdout(predicate::str::contains(
        "1,Build a wall,alice,bob,200.00,completed",
    ));
}

#[test]
fn test_cancelling_claimed_task_applies_penalty() {
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["claim", "bob", "1", "", ""],
        ["cancel", "alice", "1", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("alice,900.00"))
    .stdout(predicate::str::contains(
        "1,Build a wall,alice,bob,200.00,cancelled",
    ));
}

#[test]
fn test_cancelling_open_task_refunds_everything_but_the_fee() {
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["cancel", "alice", "1", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("alice,950.00"))
    .stdout(predicate::str::contains("cancelled"));
}

#[test]
fn test_rejected_work_can_be_resubmitted_and_approved() {
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["claim", "bob", "1", "", ""],
        ["submit", "bob", "1", "", ""],
        ["reject", "alice", "1", "", "the wall leans"],
        ["submit", "bob", "1", "", ""],
        ["approve", "alice", "1", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("bob,190.00"))
    .stdout(predicate::str::contains("completed"));
}

#[test]
fn test_insufficient_funds_rejects_the_posting() {
    run(&[
        ["deposit", "alice", "", "100", ""],
        ["post", "alice", "", "200", "Build a wall"],
    ])
    .success()
    .stderr(predicate::str::contains("Error processing command"))
    .stdout(predicate::str::contains("alice,100.00"));
}

#[test]
fn test_poster_cannot_claim_own_task() {
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["claim", "alice", "1", "", ""],
    ])
    .success()
    .stderr(predicate::str::contains("may not claim"))
    .stdout(predicate::str::contains("open"));
}

#[test]
fn test_stranger_cannot_approve() {
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["claim", "bob", "1", "", ""],
        ["submit", "bob", "1", "", ""],
        ["approve", "mallory", "1", "", ""],
    ])
    .success()
    .stderr(predicate::str::contains("may not approve"))
    .stdout(predicate::str::contains("pending_approval"));
}

#[test]
fn test_sweep_with_no_overdue_reviews_changes_nothing() {
    // A freshly submitted task is well inside the review deadline
    run(&[
        ["deposit", "alice", "", "1000", ""],
        ["post", "alice", "", "200", "Build a wall"],
        ["claim", "bob", "1", "", ""],
        ["submit", "bob", "1", "", ""],
        ["sweep", "", "", "", ""],
    ])
    .success()
    .stdout(predicate::str::contains("pending_approval"));
}
