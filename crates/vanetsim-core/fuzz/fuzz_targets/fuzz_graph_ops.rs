#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vanetsim_core::graph::GraphError;
use vanetsim_core::params::ParamMap;
use vanetsim_core::test_utils::*;

/// A structured graph operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Add { deps: Vec<u8>, failing: bool },
    Remove { index: u8 },
    Depend { from: u8, on: u8 },
    SetDepends { index: u8, deps: Vec<u8> },
    Fatal { index: u8 },
    ClearErrors,
    MarkDirty,
}

/// Top-level fuzz input: a sequence of operations.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fn pick(names: &[String], index: u8) -> &str {
    &names[index as usize % names.len()]
}

fuzz_target!(|input: FuzzInput| {
    let graph = test_graph();
    let mut names: Vec<String> = Vec::new();
    let mut next = 0u32;

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(200);

    for op in &input.ops[..max_ops] {
        match op {
            FuzzOp::Add { deps, failing } => {
                let name = format!("m{next}");
                next += 1;
                let depends: Vec<&str> = if names.is_empty() {
                    Vec::new()
                } else {
                    deps.iter().take(4).map(|d| pick(&names, *d)).collect()
                };
                let type_name = if *failing { FAILING_MODEL } else { NULL_MODEL };
                graph
                    .add_model(&name, type_name, &depends.join(" "), &ParamMap::new())
                    .expect("add with existing dependencies must succeed");
                names.push(name);
            }
            FuzzOp::Remove { index } if !names.is_empty() => {
                let name = names.remove(*index as usize % names.len());
                graph.remove_model(&name).expect("known model");
            }
            FuzzOp::Depend { from, on } if !names.is_empty() => {
                let before = graph.dependency_pairs();
                match graph.add_dependency(pick(&names, *from), pick(&names, *on)) {
                    Ok(()) => {}
                    Err(GraphError::CycleDetected(_)) => {
                        assert_eq!(graph.dependency_pairs(), before);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            FuzzOp::SetDepends { index, deps } if !names.is_empty() => {
                let depends: Vec<&str> = deps.iter().take(4).map(|d| pick(&names, *d)).collect();
                let before = graph.dependency_pairs();
                if graph
                    .set_dependencies(pick(&names, *index), &depends.join(","))
                    .is_err()
                {
                    assert_eq!(graph.dependency_pairs(), before);
                }
            }
            FuzzOp::Fatal { index } if !names.is_empty() => {
                graph.mark_fatal(pick(&names, *index)).expect("known model");
            }
            FuzzOp::ClearErrors => graph.clear_all_models_error(),
            FuzzOp::MarkDirty => graph.mark_all_models_dirty(),
            _ => {}
        }
        assert_eq!(graph.len(), names.len());
        assert!(graph.build_model_tree().is_ok());
    }
});
