use super::{count_opcode, draw_body, host_calls, menu_body, script};
use fishpond_patcher::script::schema::format_fingerprint;
use fishpond_patcher::script::StepStatus;
use fishpond_patcher::validate::reachable;
use fishpond_patcher::{
    apply_script, check_script, try_apply, validate_stream, ConfigRecord, InstructionStream,
    OpCode, PatchError, TracingReporter,
};

const HARD_CODED: &[f64] = &[80.0, 65.0, 59.0, 130.0, 145.0, 160.0];

fn hard_coded_literals(stream: &InstructionStream) -> Vec<usize> {
    stream
        .iter()
        .enumerate()
        .filter(|(_, inst)| {
            let int = inst.int_value().map(f64::from);
            let value = int.or_else(|| inst.float_value());
            value.is_some_and(|v| HARD_CODED.contains(&v))
        })
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn draw_script_patches_draw_body() {
    let body = draw_body();
    validate_stream(&body).unwrap();

    for size in [3, 4] {
        let out = try_apply(&script("fish-pond-draw"), &body, &ConfigRecord::square(size)).unwrap();

        validate_stream(&out).unwrap();
        // 12 skipped blocks plus three loop bounds
        assert_eq!(host_calls(&out), 15);
        assert_eq!(count_opcode(&out, OpCode::Br), count_opcode(&body, OpCode::Br) + 12);
        assert_eq!(count_opcode(&out, OpCode::Ret), 1);
        assert!(out.len() > body.len());
    }
}

#[test]
fn menu_script_patches_menu_body() {
    let body = menu_body();
    validate_stream(&body).unwrap();

    let out = try_apply(
        &script("fish-pond-draw-in-menu"),
        &body,
        &ConfigRecord::square(3),
    )
    .unwrap();

    validate_stream(&out).unwrap();
    assert_eq!(host_calls(&out), 6);
    assert_eq!(count_opcode(&out, OpCode::Br), count_opcode(&body, OpCode::Br) + 3);
}

#[test]
fn hard_coded_geometry_is_never_executed() {
    for (name, body) in [
        ("fish-pond-draw", draw_body()),
        ("fish-pond-draw-in-menu", menu_body()),
    ] {
        assert!(!hard_coded_literals(&body).is_empty());
        let out = try_apply(&script(name), &body, &ConfigRecord::square(4)).unwrap();
        let live = reachable(&out).unwrap();
        let literals = hard_coded_literals(&out);
        assert!(!literals.is_empty(), "{name}: skipped blocks stay in place");
        for position in literals {
            assert!(
                !live[position],
                "{name}: literal at {position} is still reachable: {}",
                out.instructions()[position]
            );
        }
    }
}

#[test]
fn loop_bounds_use_configured_size() {
    let out = try_apply(
        &script("fish-pond-draw"),
        &draw_body(),
        &ConfigRecord::square(3),
    )
    .unwrap();
    let text = out.to_string();

    assert!(text.contains("call i4 GamePatches::GetSizeX(BuildingData)"));
    assert!(text.contains("call i4 GamePatches::GetSizeY(BuildingData)"));
    // The tile + 4 / tile + 5 offsets are gone from reachable code
    let live = reachable(&out).unwrap();
    let reachable_bounds = out
        .iter()
        .zip(&live)
        .filter(|(inst, is_live)| {
            **is_live && matches!(inst.opcode, OpCode::Ldc_I4_4 | OpCode::Ldc_I4_5)
        })
        .count();
    assert_eq!(reachable_bounds, 0);
}

#[test]
fn draw_script_on_menu_body_falls_back() {
    let body = menu_body();
    let outcome = apply_script(
        &script("fish-pond-draw"),
        &body,
        &ConfigRecord::square(4),
        &mut TracingReporter,
    );

    assert!(!outcome.is_applied());
    let error = outcome.error().unwrap();
    assert_eq!(error.step(), Some("pond-bottom-origin"));
    assert!(matches!(error, PatchError::PatternNotFound { .. }));
    assert_eq!(outcome.stream(), &body);
    assert_eq!(outcome.stream().fingerprint(), body.fingerprint());
}

#[test]
fn menu_script_on_draw_body_falls_back() {
    let body = draw_body();
    let outcome = apply_script(
        &script("fish-pond-draw-in-menu"),
        &body,
        &ConfigRecord::square(4),
        &mut TracingReporter,
    );

    assert_eq!(outcome.error().and_then(|e| e.step()), Some("netting-rect"));
    assert_eq!(outcome.into_stream(), body);
}

#[test]
fn invalid_config_falls_back() {
    let body = draw_body();
    let outcome = apply_script(
        &script("fish-pond-draw"),
        &body,
        &ConfigRecord::new(4, 0),
        &mut TracingReporter,
    );
    assert!(matches!(
        outcome.error(),
        Some(PatchError::InvalidConfig(_))
    ));
    assert_eq!(outcome.stream(), &body);
}

#[test]
fn applying_is_deterministic() {
    let body = draw_body();
    let script = script("fish-pond-draw");
    let config = ConfigRecord::new(3, 4);

    let first = try_apply(&script, &body, &config).unwrap();
    let second = try_apply(&script, &body, &config).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn patched_body_survives_text_round_trip() {
    let out = try_apply(
        &script("fish-pond-draw"),
        &draw_body(),
        &ConfigRecord::square(4),
    )
    .unwrap();
    let reparsed = fishpond_patcher::il::asm::parse(&out.to_string()).unwrap();
    assert_eq!(reparsed.to_string(), out.to_string());
    validate_stream(&reparsed).unwrap();
}

#[test]
fn verify_gate_pins_the_input() {
    let body = draw_body();
    let mut pinned = script("fish-pond-draw");
    pinned.meta.verify = Some(format_fingerprint(body.fingerprint()));
    assert!(try_apply(&pinned, &body, &ConfigRecord::square(4)).is_ok());

    let outcome = apply_script(
        &pinned,
        &menu_body(),
        &ConfigRecord::square(4),
        &mut TracingReporter,
    );
    assert!(matches!(
        outcome.error(),
        Some(PatchError::ShapeMismatch { .. })
    ));
}

#[test]
fn check_reports_the_failing_step() {
    let script = script("fish-pond-draw");
    let check = check_script(&script, &menu_body(), &ConfigRecord::square(4));
    assert!(!check.is_ok());

    let statuses: Vec<&str> = check
        .steps
        .iter()
        .map(|(_, status)| match status {
            StepStatus::Ok(_) => "ok",
            StepStatus::Failed(_) => "failed",
            StepStatus::NotRun => "not run",
        })
        .collect();
    assert_eq!(&statuses[..3], &["ok", "ok", "failed"]);
    assert!(statuses[3..].iter().all(|s| *s == "not run"));
    assert_eq!(check.steps[2].0, "pond-bottom-origin");
}

#[test]
fn check_fingerprint_matches_apply() {
    let body = draw_body();
    let script = script("fish-pond-draw");
    let config = ConfigRecord::square(4);

    let check = check_script(&script, &body, &config);
    let out = try_apply(&script, &body, &config).unwrap();
    assert_eq!(check.result, Ok(out.fingerprint()));
    assert!(check
        .steps
        .iter()
        .all(|(_, status)| matches!(status, StepStatus::Ok(_))));
}
