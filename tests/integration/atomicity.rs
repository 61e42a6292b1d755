//! A failing script never leaks a partial edit into its output.

use super::{draw_body, script};
use fishpond_patcher::script::{Action, Anchor, Step, StepReport};
use fishpond_patcher::{
    apply_script, ConfigRecord, InstructionStream, PatchError, PatchOutcome, PatchScript,
    Reporter,
};

/// Records callbacks so tests can see how far a script got.
#[derive(Default)]
struct Recorder {
    applied_steps: Vec<String>,
    failures: Vec<String>,
}

impl Reporter for Recorder {
    fn step_applied(&mut self, _script: &str, step: &str, _report: &StepReport) {
        self.applied_steps.push(step.to_string());
    }

    fn script_failed(&mut self, script: &str, error: &PatchError) {
        self.failures.push(format!("{script}: {error}"));
    }
}

fn with_trailing_step(mut script: PatchScript, pattern: &str) -> PatchScript {
    script.steps.push(Step {
        id: "never-matches".to_string(),
        pattern: vec![pattern.to_string()],
        anchor: Anchor::Start,
        from_start: true,
        action: Action::Capture {
            register: "unused".to_string(),
            kind: Default::default(),
            offset: 0,
        },
    });
    script
}

#[test]
fn late_failure_discards_earlier_steps() {
    let body = draw_body();
    let script = with_trailing_step(script("fish-pond-draw"), "ldc.i4 9999");
    let mut recorder = Recorder::default();

    let outcome = apply_script(&script, &body, &ConfigRecord::square(4), &mut recorder);

    // Every real step ran and edited its private copy before the failure
    assert_eq!(recorder.applied_steps.len(), script.steps.len() - 1);
    assert_eq!(recorder.failures.len(), 1);
    assert!(recorder.failures[0].contains("never-matches"));

    match outcome {
        PatchOutcome::Fallback { stream, error } => {
            assert_eq!(stream, body);
            assert_eq!(error.step(), Some("never-matches"));
        }
        PatchOutcome::Applied { .. } => panic!("script should have failed"),
    }
}

#[test]
fn input_is_never_mutated() {
    let body = draw_body();
    let snapshot: InstructionStream = body.clone();
    let fingerprint = body.fingerprint();

    let _ = apply_script(
        &script("fish-pond-draw"),
        &body,
        &ConfigRecord::square(3),
        &mut Recorder::default(),
    );
    let _ = apply_script(
        &with_trailing_step(script("fish-pond-draw"), "ldc.i4 9999"),
        &body,
        &ConfigRecord::square(3),
        &mut Recorder::default(),
    );

    assert_eq!(body, snapshot);
    assert_eq!(body.fingerprint(), fingerprint);
}
