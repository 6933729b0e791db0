//! End-to-end rolling scenarios: build unrolled IR, run the roller, and check
//! both the shape of the result and, through the interpreter, that it still
//! computes the same thing.

use roller::ir::interpreter::{Interpreter, Memory, NoHost, RuntimeValue};
use roller::ir::stride::InductionStrideOracle;
use roller::ir::validation::validate_function;
use roller::ir::{
    BinaryOp, CompareOp, IrBlockId, IrBuilder, IrFunctionId, IrFunctionSignature, IrModule, IrType, IrValue,
};
use roller::logging;
use roller::rolling::classify::LaneScope;
use roller::rolling::graph::{AlignedGraph, GraphContext};
use roller::rolling::matching::intern_neutral_elements;
use roller::{roll_function, RollStats, RollingConfig};

fn roll(module: &mut IrModule, f: IrFunctionId, config: &RollingConfig) -> RollStats {
    logging::init_test();
    let stats = roll_function(module, f, config, &InductionStrideOracle::new());
    let func = module.function(f).unwrap();
    if let Err(errors) = validate_function(module, func) {
        panic!("rolled function is invalid: {:?}", errors);
    }
    stats
}

fn forced() -> RollingConfig {
    RollingConfig {
        always_roll: true,
        ..RollingConfig::default()
    }
}

fn read_i32s(interp: &Interpreter<'_, impl roller::ir::interpreter::HostEnvironment>, global: &str, n: u64) -> Vec<i64> {
    let base = interp.global_by_name(global).unwrap();
    (0..n)
        .map(|k| interp.memory.load(base + 4 * k, &IrType::I32).unwrap().as_int().unwrap())
        .collect()
}

fn write_i32s(interp: &mut Interpreter<'_, impl roller::ir::interpreter::HostEnvironment>, global: &str, values: &[i64]) {
    let base = interp.global_by_name(global).unwrap();
    for (k, &v) in values.iter().enumerate() {
        interp
            .memory
            .store(base + 4 * k as u64, &IrType::I32, RuntimeValue::Int(v))
            .unwrap();
    }
}

fn opcode_count(module: &IrModule, f: IrFunctionId, block: IrBlockId, name: &str) -> usize {
    let func = module.function(f).unwrap();
    func.block_instructions(block)
        .iter()
        .filter(|&&id| func.instruction(id).is_some_and(|i| i.opcode().name() == name))
        .count()
}

fn graph_for(module: &IrModule, f: IrFunctionId, block: IrBlockId, lanes: Vec<IrValue>) -> AlignedGraph {
    let config = RollingConfig::default();
    let oracle = InductionStrideOracle::new();
    let function = module.function(f).unwrap();
    let cx = GraphContext {
        module,
        function,
        config: &config,
        oracle: &oracle,
        block,
        scope: LaneScope::Block(block),
    };
    AlignedGraph::build(&cx, lanes)
}

// === dummy(); A[i] = t + i ===

/// Four lanes of `t = dummy(); A[i] = t + i`. With `interfere` a store to
/// another global sits between the second and third lane.
fn dummy_lanes(interfere: bool) -> (IrModule, IrFunctionId, IrBlockId) {
    let mut module = IrModule::new("scenario");
    let a = module.add_global("A", IrType::array(IrType::I32, 4), None, false);
    let c = module.add_global("C", IrType::I32, None, false);
    let dummy = module.declare_function("dummy", IrFunctionSignature::new(vec![], IrType::I32));
    let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::Void));
    let mut b = IrBuilder::new(&mut module, f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let zero = b.const_int(IrType::I64, 0);
    for i in 0..4 {
        if interfere && i == 2 {
            let one = b.const_int(IrType::I32, 1);
            b.build_store(one, IrValue::Global(c));
        }
        let t = b.build_call(IrValue::Function(dummy), vec![]);
        let k = b.const_int(IrType::I32, i);
        let sum = b.build_binop(BinaryOp::Add, t, k);
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(a), vec![zero, idx]);
        b.build_store(sum, p);
    }
    b.build_return(None);
    (module, f, entry)
}

/// Run `f` with a `dummy` returning 10, 20, 30, ... and return A and the
/// number of calls
fn run_dummy(module: &IrModule) -> (Vec<i64>, i64) {
    let mut calls = 0;
    let host = |name: &str, _args: &[RuntimeValue], _memory: &mut Memory| {
        assert_eq!(name, "dummy");
        calls += 1;
        Ok::<_, String>(RuntimeValue::Int(calls * 10))
    };
    let out = {
        let mut interp = Interpreter::new(module, host).unwrap();
        interp.run("f", &[]).unwrap();
        read_i32s(&interp, "A", 4)
    };
    (out, calls)
}

#[test]
fn test_dummy_stores_roll_into_one_loop() {
    let (mut module, f, entry) = dummy_lanes(false);
    let (before, calls) = run_dummy(&module);
    assert_eq!(before, vec![10, 21, 32, 43]);
    assert_eq!(calls, 4);

    let stats = roll(&mut module, f, &RollingConfig::default());
    assert_eq!(stats.rolled_loops, 1);

    let func = module.function(f).unwrap();
    let blocks = func.block_ids();
    assert_eq!(blocks.len(), 4);
    let pre_header = func.successors(entry)[0];
    let header = func.successors(pre_header)[0];
    let exit = func
        .successors(header)
        .into_iter()
        .find(|&b| b != header)
        .unwrap();
    assert!(func.successors(header).contains(&header));
    assert_eq!(opcode_count(&module, f, header, "call"), 1);
    assert_eq!(opcode_count(&module, f, header, "getelementptr"), 1);
    assert_eq!(opcode_count(&module, f, header, "store"), 1);
    // the lane add plus the induction update
    assert_eq!(opcode_count(&module, f, header, "add"), 2);
    assert_eq!(opcode_count(&module, f, exit, "ret"), 1);

    assert_eq!(run_dummy(&module), (before, 4));
}

#[test]
fn test_foreign_store_between_lanes_keeps_code() {
    let (mut module, f, _) = dummy_lanes(true);
    let count = module.function(f).unwrap().instruction_count();
    let blocks = module.function(f).unwrap().block_ids();

    let stats = roll(&mut module, f, &RollingConfig::default());
    assert_eq!(stats.rolled_loops, 0);
    let func = module.function(f).unwrap();
    assert_eq!(func.instruction_count(), count);
    assert_eq!(func.block_ids(), blocks);
}

#[test]
fn test_rejected_attempt_leaves_function_untouched() {
    let (mut module, f, _) = dummy_lanes(false);
    let count = module.function(f).unwrap().instruction_count();
    let globals = module.globals.len();
    let config = RollingConfig {
        size_threshold: 1000,
        ..RollingConfig::default()
    };

    let stats = roll(&mut module, f, &config);
    assert!(stats.attempts >= 1);
    assert_eq!(stats.rolled_loops, 0);
    let func = module.function(f).unwrap();
    assert_eq!(func.instruction_count(), count);
    assert_eq!(func.block_ids().len(), 1);
    assert_eq!(module.globals.len(), globals);
}

// === Pure duplication ===

/// `t = src(x); sink(t)` three times over
fn duplicated() -> (IrModule, IrFunctionId, IrBlockId, Vec<IrValue>) {
    let mut module = IrModule::new("dup");
    let src = module.declare_function("src", IrFunctionSignature::new(vec![IrType::I32], IrType::I32));
    let sink = module.declare_function("sink", IrFunctionSignature::new(vec![IrType::I32], IrType::Void));
    let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::Void));
    let mut b = IrBuilder::new(&mut module, f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let mut sinks = Vec::new();
    for _ in 0..3 {
        let t = b.build_call(IrValue::Function(src), vec![IrValue::Arg(0)]);
        sinks.push(b.build_call(IrValue::Function(sink), vec![t]));
    }
    b.build_return(None);
    (module, f, entry, sinks)
}

#[test]
fn test_pure_duplication_is_all_matching() {
    let (module, f, entry, sinks) = duplicated();
    let graph = graph_for(&module, f, entry, sinks.clone());
    assert_eq!(graph.mismatch_count(), 0);
    assert!(graph
        .nodes()
        .all(|(_, node)| matches!(node.kind.name(), "match" | "identical")));

    // Every child has the lane count of its parent
    for (_, node) in graph.nodes() {
        for &child in &node.children {
            assert_eq!(graph.node(child).size(), node.size());
        }
    }

    // Classifying the same tuples again gives the same kinds
    let again = graph_for(&module, f, entry, sinks);
    assert_eq!(again.kind_counts(), graph.kind_counts());
}

#[test]
fn test_pure_duplication_rolls() {
    let (mut module, f, _, _) = duplicated();
    let seen = |module: &IrModule| {
        let mut log = Vec::new();
        let host = |name: &str, args: &[RuntimeValue], _memory: &mut Memory| {
            let x = args.first().and_then(|a| a.as_int()).unwrap_or(0);
            log.push((name.to_string(), x));
            Ok::<_, String>(RuntimeValue::Int(x + log.len() as i64))
        };
        let mut interp = Interpreter::new(module, host).unwrap();
        interp.run("f", &[RuntimeValue::Int(4)]).unwrap();
        drop(interp);
        log
    };
    let before = seen(&module);
    assert_eq!(before.len(), 6);

    let stats = roll(&mut module, f, &RollingConfig::default());
    assert_eq!(stats.rolled_loops, 1);
    assert_eq!(stats.node_kinds.get("mismatch"), None);
    assert_eq!(seen(&module), before);
}

// === Order of side effects ===

/// Two lanes of `A[i] = f() + g()`, with the calls of the second lane in
/// the opposite order when `swapped`
fn two_calls(swapped: bool) -> (IrModule, IrFunctionId, IrBlockId, Vec<IrValue>) {
    let mut module = IrModule::new("order");
    let a = module.add_global("A", IrType::array(IrType::I32, 2), None, false);
    let fc = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::I32));
    let gc = module.declare_function("g", IrFunctionSignature::new(vec![], IrType::I32));
    let func = module.declare_function("run", IrFunctionSignature::new(vec![], IrType::Void));
    let mut b = IrBuilder::new(&mut module, func);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let zero = b.const_int(IrType::I64, 0);
    let mut stores = Vec::new();
    for i in 0..2 {
        let (x, y) = if swapped && i == 1 {
            let y = b.build_call(IrValue::Function(gc), vec![]);
            let x = b.build_call(IrValue::Function(fc), vec![]);
            (x, y)
        } else {
            let x = b.build_call(IrValue::Function(fc), vec![]);
            let y = b.build_call(IrValue::Function(gc), vec![]);
            (x, y)
        };
        let sum = b.build_binop(BinaryOp::Add, x, y);
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, 2), IrValue::Global(a), vec![zero, idx]);
        stores.push(b.build_store(sum, p));
    }
    b.build_return(None);
    (module, func, entry, stores)
}

#[test]
fn test_swapped_side_effects_are_rejected() {
    let (module, f, entry, stores) = two_calls(false);
    let mut graph = graph_for(&module, f, entry, stores);
    assert!(graph.is_schedulable(&module, module.function(f).unwrap(), entry));

    let (mut module, f, entry, stores) = two_calls(true);
    let mut graph = graph_for(&module, f, entry, stores);
    assert_eq!(graph.mismatch_count(), 0);
    assert!(!graph.is_schedulable(&module, module.function(f).unwrap(), entry));

    let count = module.function(f).unwrap().instruction_count();
    let stats = roll(&mut module, f, &forced());
    assert_eq!(stats.rolled_loops, 0);
    assert_eq!(module.function(f).unwrap().instruction_count(), count);
}

// === Reductions ===

/// `return A[0] + A[1] + ... + A[n-1]`
fn sum_of_loads(n: i64) -> (IrModule, IrFunctionId) {
    let mut module = IrModule::new("sum");
    let a = module.add_global("A", IrType::array(IrType::I32, n as u64), None, false);
    let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::I32));
    let mut b = IrBuilder::new(&mut module, f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let zero = b.const_int(IrType::I64, 0);
    let mut acc = None;
    for i in 0..n {
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, n as u64), IrValue::Global(a), vec![zero, idx]);
        let v = b.build_load(IrType::I32, p);
        acc = Some(match acc {
            Some(sum) => b.build_binop(BinaryOp::Add, sum, v),
            None => v,
        });
    }
    b.build_return(acc);
    (module, f)
}

fn run_with_array(module: &IrModule, input: &[i64]) -> i64 {
    let mut interp = Interpreter::new(module, NoHost).unwrap();
    write_i32s(&mut interp, "A", input);
    interp.run("f", &[]).unwrap().as_int().unwrap()
}

#[test]
fn test_reduction_computes_the_same_sum() {
    let (mut module, f) = sum_of_loads(8);
    let inputs: [&[i64]; 3] = [
        &[1, 2, 3, 4, 5, 6, 7, 8],
        &[-5, 0, 9, i32::MAX as i64, 1, -1, 3, 100],
        &[0; 8],
    ];
    let before: Vec<i64> = inputs.iter().map(|i| run_with_array(&module, i)).collect();
    assert_eq!(before[0], 36);

    let stats = roll(&mut module, f, &RollingConfig::default());
    assert_eq!(stats.rolled_loops, 1);
    assert_eq!(stats.node_kinds.get("reduction"), Some(&1));
    let after: Vec<i64> = inputs.iter().map(|i| run_with_array(&module, i)).collect();
    assert_eq!(after, before);
}

/// `m = A[0]; m = A[k] < m ? A[k] : m` style chain, written as
/// `select(m < A[k], m, A[k])`
fn min_of_loads(n: i64) -> (IrModule, IrFunctionId, IrBlockId, IrValue) {
    let mut module = IrModule::new("min");
    let a = module.add_global("A", IrType::array(IrType::I32, n as u64), None, false);
    let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::I32));
    let mut b = IrBuilder::new(&mut module, f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let zero = b.const_int(IrType::I64, 0);
    let mut loads = Vec::new();
    for i in 0..n {
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, n as u64), IrValue::Global(a), vec![zero, idx]);
        loads.push(b.build_load(IrType::I32, p));
    }
    let mut m = loads[0];
    for &v in &loads[1..] {
        let c = b.build_cmp(CompareOp::SLt, m, v);
        m = b.build_select(c, m, v);
    }
    b.build_return(Some(m));
    (module, f, entry, m)
}

#[test]
fn test_minmax_needs_extensions_and_keeps_semantics() {
    let input = [7, 3, 9, -2, 8, 5, -1, 4];
    let (mut module, f, _, _) = min_of_loads(8);
    let expected = run_with_array(&module, &input);
    assert_eq!(expected, -2);

    let stats = roll(&mut module, f, &RollingConfig::default());
    assert_eq!(stats.rolled_loops, 0);

    let stats = roll(&mut module, f, &RollingConfig::with_extensions());
    assert_eq!(stats.rolled_loops, 1);
    assert_eq!(stats.node_kinds.get("minmax"), Some(&1));
    assert_eq!(run_with_array(&module, &input), expected);
    assert_eq!(run_with_array(&module, &[5, 5, 5, 5, 5, 5, 5, 1]), 1);
}

/// `m = a0; m = (m < a_k) ? m : a_k` over eight double arguments
fn float_min_of_args() -> (IrModule, IrFunctionId) {
    let mut module = IrModule::new("fmin");
    let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::F64; 8], IrType::F64));
    let mut b = IrBuilder::new(&mut module, f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let mut m = IrValue::Arg(0);
    for k in 1..8 {
        let c = b.build_cmp(CompareOp::FLt, m, IrValue::Arg(k));
        m = b.build_select(c, m, IrValue::Arg(k));
    }
    b.build_return(Some(m));
    (module, f)
}

fn run_float_min(module: &IrModule, args: [f64; 8]) -> u64 {
    let mut interp = Interpreter::new(module, NoHost).unwrap();
    let args: Vec<RuntimeValue> = args.iter().map(|&v| RuntimeValue::Float(v)).collect();
    interp.run("f", &args).unwrap().as_float().unwrap().to_bits()
}

#[test]
fn test_float_minmax_keeps_operand_sides() {
    let inputs = [
        [1.0, f64::NAN, 2.0, 0.5, 3.0, f64::NAN, 4.0, 5.0],
        [3.0, 1.0, 2.0, 6.0, 0.0, -0.0, 7.0, f64::NAN],
        [f64::NAN, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0],
    ];
    let (mut module, f) = float_min_of_args();
    let expected: Vec<u64> = inputs.iter().map(|&args| run_float_min(&module, args)).collect();
    assert_eq!(f64::from_bits(expected[0]), 4.0);
    assert!(f64::from_bits(expected[1]).is_nan());
    assert_eq!(f64::from_bits(expected[2]), 2.0);

    let config = RollingConfig {
        always_roll: true,
        ..RollingConfig::with_extensions()
    };
    let stats = roll(&mut module, f, &config);
    assert_eq!(stats.rolled_loops, 1);
    assert_eq!(stats.node_kinds.get("minmax"), Some(&1));
    for (args, want) in inputs.iter().zip(&expected) {
        assert_eq!(run_float_min(&module, *args), *want);
    }
}

#[test]
fn test_minmax_skip_drops_trailing_links() {
    let (mut module, f, entry, root) = min_of_loads(6);
    intern_neutral_elements(&mut module);
    let config = RollingConfig::with_extensions();
    let oracle = InductionStrideOracle::new();
    let function = module.function(f).unwrap();
    let cx = GraphContext {
        module: &module,
        function,
        config: &config,
        oracle: &oracle,
        block: entry,
        scope: LaneScope::Block(entry),
    };
    let lanes = |skip| {
        AlignedGraph::build_minmax(&cx, root, skip).map(|g| g.node(g.root().unwrap()).size())
    };
    assert_eq!(lanes(0), Some(5));
    assert_eq!(lanes(1), Some(4));
    assert_eq!(lanes(3), Some(2));
    assert_eq!(lanes(4), None);
}

// === Alternating values ===

/// `A[0] = x; A[1] = -x; A[2] = x; A[3] = -x`, then the same with the
/// constants `c` and `-c` into B
fn alternating(c: i64) -> (IrModule, IrFunctionId) {
    let mut module = IrModule::new("alt");
    let a = module.add_global("A", IrType::array(IrType::I32, 4), None, false);
    let bg = module.add_global("B", IrType::array(IrType::I32, 4), None, false);
    let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::Void));
    let mut b = IrBuilder::new(&mut module, f);
    let entry = b.create_block("entry");
    b.position_at_end(entry);
    let zero = b.const_int(IrType::I64, 0);
    let zero32 = b.const_int(IrType::I32, 0);
    let neg = b.build_binop(BinaryOp::Sub, zero32, IrValue::Arg(0));
    for i in 0..4 {
        let value = if i % 2 == 0 { IrValue::Arg(0) } else { neg };
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(a), vec![zero, idx]);
        b.build_store(value, p);
    }
    for i in 0..4 {
        let value = if i % 2 == 0 {
            b.const_int(IrType::I32, c)
        } else {
            b.const_int(IrType::I32, (c as i32).wrapping_neg() as i64)
        };
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(bg), vec![zero, idx]);
        b.build_store(value, p);
    }
    b.build_return(None);
    (module, f)
}

fn run_alternating(module: &IrModule, x: i64) -> (Vec<i64>, Vec<i64>) {
    let mut interp = Interpreter::new(module, NoHost).unwrap();
    interp.run("f", &[RuntimeValue::Int(x)]).unwrap();
    (read_i32s(&interp, "A", 4), read_i32s(&interp, "B", 4))
}

#[test]
fn test_alternating_negation() {
    let (mut module, f) = alternating(7);
    let xs = [5, -3, 0, i32::MIN as i64, i32::MAX as i64];
    let before: Vec<_> = xs.iter().map(|&x| run_alternating(&module, x)).collect();
    assert_eq!(before[0], (vec![5, -5, 5, -5], vec![7, -7, 7, -7]));

    // A rolls first, then B from the block left after the first loop
    let stats = roll(&mut module, f, &forced());
    assert_eq!(stats.rolled_loops, 2);
    let after: Vec<_> = xs.iter().map(|&x| run_alternating(&module, x)).collect();
    assert_eq!(after, before);
}

#[test]
fn test_negation_of_minimum_value() {
    let min = i32::MIN as i64;
    let (mut module, f) = alternating(min);
    let before = run_alternating(&module, min);
    assert_eq!(before, (vec![min; 4], vec![min; 4]));

    let stats = roll(&mut module, f, &forced());
    assert_eq!(stats.rolled_loops, 2);
    assert_eq!(run_alternating(&module, min), before);
    assert_eq!(run_alternating(&module, 1), (vec![1, -1, 1, -1], vec![min; 4]));
}

// === Regions ===

/// `B[i] = if A[i] > 0 { 1 } else { 2 }` unrolled into chained diamonds
fn chained_diamonds(n: i64) -> (IrModule, IrFunctionId) {
    let mut module = IrModule::new("diamonds");
    let a = module.add_global("A", IrType::array(IrType::I32, n as u64), None, false);
    let out = module.add_global("B", IrType::array(IrType::I32, n as u64), None, false);
    let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::Void));
    let mut b = IrBuilder::new(&mut module, f);
    let mut head = b.create_block("entry");
    let zero = b.const_int(IrType::I64, 0);
    let zero32 = b.const_int(IrType::I32, 0);
    let one = b.const_int(IrType::I32, 1);
    let two = b.const_int(IrType::I32, 2);
    for i in 0..n {
        let then_block = b.create_block(&format!("then{}", i));
        let else_block = b.create_block(&format!("else{}", i));
        let join = b.create_block(&format!("join{}", i));
        b.position_at_end(head);
        let idx = b.const_int(IrType::I64, i);
        let p = b.build_gep(IrType::array(IrType::I32, n as u64), IrValue::Global(a), vec![zero, idx]);
        let v = b.build_load(IrType::I32, p);
        let c = b.build_cmp(CompareOp::SGt, v, zero32);
        b.build_cond_br(c, then_block, else_block);
        b.position_at_end(then_block);
        b.build_br(join);
        b.position_at_end(else_block);
        b.build_br(join);
        b.position_at_end(join);
        let phi = b.build_phi(IrType::I32);
        b.add_incoming(phi, one, then_block);
        b.add_incoming(phi, two, else_block);
        let q = b.build_gep(IrType::array(IrType::I32, n as u64), IrValue::Global(out), vec![zero, idx]);
        b.build_store(phi, q);
        head = join;
    }
    b.position_at_end(head);
    b.build_return(None);
    (module, f)
}

fn run_diamonds(module: &IrModule, input: &[i64]) -> Vec<i64> {
    let mut interp = Interpreter::new(module, NoHost).unwrap();
    write_i32s(&mut interp, "A", input);
    interp.run("f", &[]).unwrap();
    read_i32s(&interp, "B", input.len() as u64)
}

#[test]
fn test_chained_diamonds_roll_into_region_loop() {
    let (mut module, f) = chained_diamonds(4);
    let input = [4, -4, 0, 12];
    let before = run_diamonds(&module, &input);
    assert_eq!(before, vec![1, 2, 2, 1]);
    let blocks = module.function(f).unwrap().block_ids().len();

    let stats = roll(&mut module, f, &RollingConfig::default());
    assert_eq!(stats.rolled_regions, 0);

    let stats = roll(&mut module, f, &RollingConfig::with_extensions());
    assert_eq!(stats.rolled_regions, 1);
    assert!(module.function(f).unwrap().block_ids().len() < blocks);
    assert_eq!(run_diamonds(&module, &input), before);
    assert_eq!(run_diamonds(&module, &[-1, -1, 1, 1]), vec![2, 2, 1, 1]);
}
