//! End-to-end scenarios: record with the tracing facade, compile, execute,
//! and check values/gradients against hand-computed expectations.

use forge::{Compiler, CompilerConfig, Error, Fdouble, Fint, InstructionSetKind, Recorder};

fn record<F>(f: F) -> forge_ir::Graph
where
    F: FnOnce() -> forge::Result<()>,
{
    let mut r = Recorder::new();
    r.start().unwrap();
    f().unwrap();
    r.stop().unwrap().clone()
}

#[test]
fn linear() {
    let graph = record(|| {
        let x = Fdouble::mark_input_and_diff(4.0)?;
        let y = x * 2.0 + 3.0;
        y.mark_output()?;
        Ok(())
    });

    let (kernel, mut buffer) = Compiler::compile(&graph, &CompilerConfig::no_optimization()).unwrap();
    buffer.set_value(0, 4.0).unwrap();
    buffer.set_gradient(0, 1.0).unwrap();
    buffer.execute(&kernel).unwrap();

    let y_node = graph.outputs[0];
    assert_eq!(buffer.get_value(y_node).unwrap(), 11.0);
    assert_eq!(buffer.get_gradient(0).unwrap(), 2.0);
}

#[test]
fn quadratic_with_reuse() {
    let graph = record(|| {
        let x = Fdouble::mark_input_and_diff(5.0)?;
        let y = x * x + 2.0 * x + 1.0;
        y.mark_output()?;
        Ok(())
    });

    let (kernel, mut buffer) = Compiler::compile(&graph, &CompilerConfig::no_optimization()).unwrap();
    buffer.set_value(0, 5.0).unwrap();
    buffer.set_gradient(0, 1.0).unwrap();
    buffer.execute(&kernel).unwrap();

    let y_node = graph.outputs[0];
    assert_eq!(buffer.get_value(y_node).unwrap(), 36.0);
    assert_eq!(buffer.get_gradient(0).unwrap(), 12.0);
}

#[test]
fn conditional() {
    let graph = record(|| {
        let x = Fdouble::mark_input_and_diff(0.0)?;
        let cond = x.gt(Fdouble::from(0.0));
        let y = cond.if_(x * 2.0, -x)?;
        y.mark_output()?;
        Ok(())
    });

    let config = CompilerConfig::no_optimization();

    for (x0, expected_y, expected_grad) in [(3.0, 6.0, 2.0), (-2.0, 2.0, -1.0)] {
        let (kernel, mut buffer) = Compiler::compile(&graph, &config).unwrap();
        buffer.set_value(0, x0).unwrap();
        buffer.set_gradient(0, 1.0).unwrap();
        buffer.execute(&kernel).unwrap();

        let y_node = graph.outputs[0];
        assert_eq!(buffer.get_value(y_node).unwrap(), expected_y);
        assert_eq!(buffer.get_gradient(0).unwrap(), expected_grad);
    }
}

#[test]
fn fint_chain_of_ifs_array_index() {
    let graph = record(|| {
        let x = Fdouble::mark_input(0.0)?;
        let cond = x.lt(Fdouble::from(0.0));
        let i = cond.if_(Fint::from(0), Fint::from(1))?;
        let y = i.index(&[Fdouble::from(7.0), Fdouble::from(13.0)])?;
        y.mark_output()?;
        Ok(())
    });

    let config = CompilerConfig::no_optimization();

    for (x0, expected_y) in [(-1.0, 7.0), (1.0, 13.0)] {
        let (kernel, mut buffer) = Compiler::compile(&graph, &config).unwrap();
        buffer.set_value(0, x0).unwrap();
        buffer.execute(&kernel).unwrap();

        let y_node = graph.outputs[0];
        assert_eq!(buffer.get_value(y_node).unwrap(), expected_y);
    }
}

#[test]
fn avx2_lane_independence() {
    // f(x) = 3x^3 - 2x^2 + 5x - 7
    let graph = record(|| {
        let x = Fdouble::mark_input(0.0)?;
        let y = 3.0 * x * x * x - 2.0 * x * x + 5.0 * x - 7.0;
        y.mark_output()?;
        Ok(())
    });

    let lanes = [1.0, 2.0, 3.0, 4.0];

    let (scalar_kernel, mut scalar_buffer) =
        Compiler::compile(&graph, &CompilerConfig::no_optimization()).unwrap();
    let mut expected = [0.0; 4];
    for (i, &lane) in lanes.iter().enumerate() {
        scalar_buffer.set_value(0, lane).unwrap();
        scalar_buffer.execute(&scalar_kernel).unwrap();
        expected[i] = scalar_buffer.get_value(graph.outputs[0]).unwrap();
    }

    let avx2_config = CompilerConfig {
        instruction_set: InstructionSetKind::Avx2Packed,
        ..CompilerConfig::no_optimization()
    };
    let (avx2_kernel, mut avx2_buffer) = Compiler::compile(&graph, &avx2_config).unwrap();
    avx2_buffer.set_lanes(0, &lanes).unwrap();
    avx2_buffer.execute(&avx2_kernel).unwrap();

    let mut actual = [0.0; 4];
    avx2_buffer.get_lanes(graph.outputs[0], &mut actual).unwrap();

    for i in 0..4 {
        assert!(
            (actual[i] - expected[i]).abs() <= 1e-10,
            "lane {i}: avx2 {} vs scalar {}",
            actual[i],
            expected[i]
        );
    }
}

#[test]
fn recorder_contract_violation_without_output() {
    let mut r = Recorder::new();
    r.start().unwrap();
    Fdouble::mark_input(1.0).unwrap();
    let err = r.stop().unwrap_err();
    assert!(matches!(err, forge_ir::Error::NoOutputsMarked));

    // the recorder returns to the idle state and can start again
    assert!(r.start().is_ok());
    Fdouble::mark_input(1.0).unwrap().mark_output().unwrap();
    r.stop().unwrap();
}

#[test]
fn empty_array_index_fails() {
    let mut r = Recorder::new();
    r.start().unwrap();
    let err = Fint::from(0).index(&[]).unwrap_err();
    assert!(matches!(err, Error::Ir(forge_ir::Error::EmptyArrayIndex)));
    Fdouble::mark_input(0.0).unwrap().mark_output().unwrap();
    r.stop().unwrap();
}
