//! Integration test harness for Tessel.
//!
//! Drives the full pipeline end to end: record a program through the
//! host surface, compile it to a task graph, execute the driver, and
//! inspect globals and field state.

use tessel_dsl::program::Program;
use tessel_ir::{FieldId, GlobalId, RelationId};
use tessel_runtime::{Machine, Value};

/// Test harness wrapping a compiled and executed program.
pub struct Harness {
    machine: Machine,
}

impl Harness {
    /// Compile and run a recorded program.
    ///
    /// # Panics
    ///
    /// Panics if compilation or execution fails.
    pub fn run(program: &Program) -> Harness {
        let graph = tessel_dsl::compile(program).expect("compilation failed");
        let mut machine = Machine::new(graph);
        machine.run().expect("execution failed");
        Harness { machine }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn global(&self, name: &str) -> Value {
        self.machine
            .global(&GlobalId::from(name))
            .expect("global exists")
            .clone()
    }

    pub fn global_f64(&self, name: &str) -> f64 {
        self.global(name).as_f64().expect("numeric global")
    }

    pub fn field(&self, rel: &str, field: &str, row: u64) -> Value {
        self.machine
            .read_field(
                &RelationId::from(rel),
                &FieldId(format!("{}.{}", rel, field)),
                row,
            )
            .expect("field row exists")
    }

    pub fn field_f64(&self, rel: &str, field: &str, row: u64) -> f64 {
        self.field(rel, field, row).as_f64().expect("numeric field")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_dsl::ast::raw::{Expr as E, Stmt as S};
    use tessel_dsl::context::{get_global, num};
    use tessel_dsl::{Context, ErrorKind};
    use tessel_ir::driver::{CmpOp, ControlBinOp, ControlCond, ControlExpr};
    use tessel_ir::{ConstValue, Primitive, ReduceOp, Type};

    // Scenario: a 4x4 grid with boundary depth 1 yields 12 boundary and
    // 4 interior cells; cell 5 is interior, cell 0 boundary.
    #[test]
    fn test_grid_boundary_subsets() {
        let mut ctx = Context::new();
        let g = ctx.new_grid("g", &[4, 4], 1).unwrap();
        let boundary = g.boundary.clone().unwrap();
        let interior = g.interior.clone().unwrap();

        {
            let b = ctx.catalog().subset(&boundary).unwrap();
            assert_eq!(b.data.member_count(), 12);
            assert!(b.data.contains(0));
            assert!(!b.data.contains(5));
            let i = ctx.catalog().subset(&interior).unwrap();
            assert_eq!(i.data.member_count(), 4);
        }

        // Count both subsets through launches as well
        ctx.new_global("n_boundary", Type::F64, 0.0).unwrap();
        ctx.new_global("n_interior", Type::F64, 0.0).unwrap();
        let count_b = ctx
            .new_kernel(
                "count_b",
                "c",
                vec![S::reduce(E::name("n_boundary"), ReduceOp::Add, E::num(1.0))],
            )
            .unwrap();
        let count_i = ctx
            .new_kernel(
                "count_i",
                "c",
                vec![S::reduce(E::name("n_interior"), ReduceOp::Add, E::num(1.0))],
            )
            .unwrap();
        ctx.for_each_subset(&count_b, &g.cells, &boundary).unwrap();
        ctx.for_each_subset(&count_i, &g.cells, &interior).unwrap();

        let program = ctx.finish().unwrap();
        let h = Harness::run(&program);
        assert_eq!(h.global_f64("n_boundary"), 12.0);
        assert_eq!(h.global_f64("n_interior"), 4.0);
    }

    // Scenario: v.x = v.x + 1 launched twice over 10 rows of i32 zero
    // yields x = 2 everywhere.
    #[test]
    fn test_double_increment() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(10, "verts").unwrap();
        let x = ctx
            .new_field(&rel, "x", Type::Primitive(Primitive::I32))
            .unwrap();
        let bump = ctx
            .new_kernel(
                "bump",
                "v",
                vec![S::assign(
                    E::name("v").dot("x"),
                    E::name("v").dot("x").add(E::num(1.0)),
                )],
            )
            .unwrap();
        ctx.load_field(&x, 0.0);
        ctx.for_each(&bump, &rel).unwrap();
        ctx.for_each(&bump, &rel).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        for row in 0..10 {
            assert_eq!(h.field("verts", "x", row), Value::Int(2));
        }
    }

    // Scenario: g += 1.0 over a 100-row relation leaves g == 100.
    #[test]
    fn test_global_sum_over_relation() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(100, "r").unwrap();
        let _g = ctx.new_global("g", Type::F64, 0.0).unwrap();
        let count = ctx
            .new_kernel(
                "count",
                "k",
                vec![S::reduce(E::name("g"), ReduceOp::Add, E::num(1.0))],
            )
            .unwrap();
        ctx.for_each(&count, &rel).unwrap();

        let program = ctx.finish().unwrap();
        let graph = tessel_dsl::compile(&program).unwrap();
        // No fields touched: the universe region is omitted from the task
        let task = graph.tasks.values().next().unwrap();
        assert!(task.regions.is_empty());
        assert!(task.reduced_global.is_some());

        let h = Harness::run(&program);
        assert_eq!(h.global_f64("g"), 100.0);
    }

    // Scenario: the affine translation [[1,0,1],[0,1,0]] on a 5x5 grid
    // moves (2,3) to (3,3) and wraps (4,3) to (0,3).
    #[test]
    fn test_affine_translation_with_wrap() {
        let mut ctx = Context::new();
        let g = ctx.new_grid("g", &[5, 5], 0).unwrap();
        let cells = g.cells.clone();
        let src = ctx.new_field(&cells, "src", Type::I64).unwrap();
        let _out = ctx.new_field(&cells, "out", Type::I64).unwrap();

        let init = ctx
            .new_kernel(
                "init",
                "c",
                vec![S::assign(
                    E::name("c").dot("src"),
                    E::name("c")
                        .dot("xid")
                        .add(E::num(10.0).mul(E::name("c").dot("yid"))),
                )],
            )
            .unwrap();
        let shift = ctx
            .new_kernel(
                "shift",
                "c",
                vec![S::assign(
                    E::name("c").dot("out"),
                    E::name("Affine")
                        .call(vec![
                            E::name("g.cells"),
                            E::matrix(vec![
                                vec![E::num(1.0), E::num(0.0), E::num(1.0)],
                                vec![E::num(0.0), E::num(1.0), E::num(0.0)],
                            ]),
                            E::name("c"),
                        ])
                        .dot("src"),
                )],
            )
            .unwrap();
        ctx.load_field(&src, 0.0);
        ctx.for_each(&init, &cells).unwrap();
        ctx.for_each(&shift, &cells).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        // x-fastest layout: id = x + 5y
        let id = |x: u64, y: u64| x + 5 * y;
        // (2,3) reads (3,3): 3 + 30
        assert_eq!(h.field("g.cells", "out", id(2, 3)), Value::Int(33));
        // (4,3) wraps to (0,3): 0 + 30
        assert_eq!(h.field("g.cells", "out", id(4, 3)), Value::Int(30));
    }

    // Law: affine translation by the zero vector is the identity.
    #[test]
    fn test_zero_translation_is_identity() {
        let mut ctx = Context::new();
        let g = ctx.new_grid("g", &[4, 4], 0).unwrap();
        let cells = g.cells.clone();
        let _f = ctx.new_field(&cells, "f", Type::I64).unwrap();
        let _out = ctx.new_field(&cells, "out", Type::I64).unwrap();

        let init = ctx
            .new_kernel(
                "init",
                "c",
                vec![S::assign(E::name("c").dot("f"), E::name("c").dot("id"))],
            )
            .unwrap();
        let copy = ctx
            .new_kernel(
                "copy",
                "c",
                vec![S::assign(
                    E::name("c").dot("out"),
                    E::name("c").call(vec![E::num(0.0), E::num(0.0)]).dot("f"),
                )],
            )
            .unwrap();
        ctx.for_each(&init, &cells).unwrap();
        ctx.for_each(&copy, &cells).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        for row in 0..16 {
            assert_eq!(h.field("g.cells", "out", row), Value::Int(row as i64));
        }
    }

    // Scenario: reading c.f while writing c(1,0).f is a stencil error.
    #[test]
    fn test_stencil_write_fails_compile() {
        let mut ctx = Context::new();
        let g = ctx.new_grid("g", &[5, 5], 0).unwrap();
        let cells = g.cells.clone();
        ctx.new_field(&cells, "f", Type::F64).unwrap();
        let bad = ctx
            .new_kernel(
                "bad",
                "c",
                vec![S::assign(
                    E::name("c").call(vec![E::num(1.0), E::num(0.0)]).dot("f"),
                    E::name("c").dot("f"),
                )],
            )
            .unwrap();
        ctx.for_each(&bad, &cells).unwrap();

        let err = tessel_dsl::compile(&ctx.finish().unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Stencil);
    }

    // Scenario: SET_GLOBAL then WHILE(g < 3) { g = g + 1 } ends with
    // g == 3.
    #[test]
    fn test_while_loop_terminates() {
        let mut ctx = Context::new();
        let g = ctx.new_global("g", Type::F64, 0.0).unwrap();
        ctx.set_global(
            &g,
            ControlExpr::binary(ControlBinOp::Add, get_global(&g), num(1.0)),
        );
        ctx.while_(ControlCond::compare(CmpOp::Lt, get_global(&g), num(3.0)));
        ctx.set_global(
            &g,
            ControlExpr::binary(ControlBinOp::Add, get_global(&g), num(1.0)),
        );
        ctx.end().unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        assert_eq!(h.global_f64("g"), 3.0);
    }

    // Law: a launch holding only read privileges leaves field state
    // unchanged.
    #[test]
    fn test_all_read_launch_is_noop() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(6, "r").unwrap();
        let x = ctx.new_field(&rel, "x", Type::F64).unwrap();
        let peek = ctx
            .new_kernel(
                "peek",
                "v",
                vec![S::local("t", E::name("v").dot("x"))],
            )
            .unwrap();
        ctx.load_field(&x, 7.0);
        ctx.for_each(&peek, &rel).unwrap();

        let program = ctx.finish().unwrap();
        let graph = tessel_dsl::compile(&program).unwrap();
        let task = graph.tasks.values().next().unwrap();
        assert!(task
            .regions
            .iter()
            .all(|r| r.privileges.iter().all(|p| matches!(p, tessel_ir::Privilege::Reads(_)))));

        let h = Harness::run(&program);
        for row in 0..6 {
            assert_eq!(h.field_f64("r", "x", row), 7.0);
        }
    }

    // Law: launches with disjoint write sets commute.
    #[test]
    fn test_disjoint_writes_commute() {
        let build = |first_x: bool| {
            let mut ctx = Context::new();
            let rel = ctx.new_relation(5, "r").unwrap();
            ctx.new_field(&rel, "x", Type::F64).unwrap();
            ctx.new_field(&rel, "y", Type::F64).unwrap();
            let kx = ctx
                .new_kernel(
                    "kx",
                    "v",
                    vec![S::assign(E::name("v").dot("x"), E::num(1.0))],
                )
                .unwrap();
            let ky = ctx
                .new_kernel(
                    "ky",
                    "v",
                    vec![S::assign(E::name("v").dot("y"), E::num(2.0))],
                )
                .unwrap();
            if first_x {
                ctx.for_each(&kx, &rel).unwrap();
                ctx.for_each(&ky, &rel).unwrap();
            } else {
                ctx.for_each(&ky, &rel).unwrap();
                ctx.for_each(&kx, &rel).unwrap();
            }
            Harness::run(&ctx.finish().unwrap())
        };
        let a = build(true);
        let b = build(false);
        for row in 0..5 {
            assert_eq!(a.field_f64("r", "x", row), b.field_f64("r", "x", row));
            assert_eq!(a.field_f64("r", "y", row), b.field_f64("r", "y", row));
        }
    }

    #[test]
    fn test_min_reduction_uses_proper_identity() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(4, "r").unwrap();
        let x = ctx.new_field(&rel, "x", Type::F64).unwrap();
        let _lo = ctx.new_global("lo", Type::F64, 100.0).unwrap();
        let find_min = ctx
            .new_kernel(
                "find_min",
                "v",
                vec![S::reduce(
                    E::name("lo"),
                    ReduceOp::Min,
                    E::name("v").dot("x"),
                )],
            )
            .unwrap();
        ctx.load_field(&x, 5.0);
        ctx.for_each(&find_min, &rel).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        assert_eq!(h.global_f64("lo"), 5.0);
    }

    #[test]
    fn test_helper_called_from_kernel() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(3, "r").unwrap();
        let x = ctx
            .new_field(&rel, "x", Type::Primitive(Primitive::I32))
            .unwrap();
        ctx.new_field(&rel, "y", Type::F64).unwrap();
        ctx.new_helper(
            "twice",
            vec![("a".to_string(), Type::F64)],
            None,
            E::name("a").add(E::name("a")),
        )
        .unwrap();
        let apply = ctx
            .new_kernel(
                "apply",
                "v",
                vec![S::assign(
                    E::name("v").dot("y"),
                    E::name("twice").call(vec![E::name("v").dot("x")]),
                )],
            )
            .unwrap();
        ctx.load_field(&x, 3.0);
        ctx.for_each(&apply, &rel).unwrap();

        let program = ctx.finish().unwrap();
        let graph = tessel_dsl::compile(&program).unwrap();
        // the helper is emitted as its own task
        assert_eq!(graph.tasks.len(), 2);

        let h = Harness::run(&program);
        for row in 0..3 {
            assert_eq!(h.field_f64("r", "y", row), 6.0);
        }
    }

    #[test]
    fn test_subset_launch_touches_only_members() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(6, "r").unwrap();
        let x = ctx.new_field(&rel, "x", Type::F64).unwrap();
        let members = ctx
            .new_subset_from_indices(&rel, "some", vec![2, 5])
            .unwrap();
        let bump = ctx
            .new_kernel(
                "bump",
                "v",
                vec![S::assign(
                    E::name("v").dot("x"),
                    E::name("v").dot("x").add(E::num(1.0)),
                )],
            )
            .unwrap();
        ctx.load_field(&x, 0.0);
        ctx.for_each_subset(&bump, &rel, &members).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        for row in 0..6 {
            let expected = if row == 2 || row == 5 { 1.0 } else { 0.0 };
            assert_eq!(h.field_f64("r", "x", row), expected);
        }
    }

    #[test]
    fn test_link_macro_reads_vertex_field() {
        let mut ctx = Context::new();
        let g = ctx.new_grid("g", &[3, 3], 0).unwrap();
        let cells = g.cells.clone();
        let verts = g.vertices.clone();
        let w = ctx.new_field(&verts, "w", Type::F64).unwrap();
        ctx.new_field(&cells, "f", Type::F64).unwrap();
        let gather = ctx
            .new_kernel(
                "gather",
                "c",
                vec![S::assign(
                    E::name("c").dot("f"),
                    E::name("c").dot("vertex").dot("w"),
                )],
            )
            .unwrap();
        ctx.load_field(&w, 2.0);
        ctx.for_each(&gather, &cells).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        for row in 0..9 {
            assert_eq!(h.field_f64("g.cells", "f", row), 2.0);
        }
    }

    #[test]
    fn test_insert_then_delete_with_defrag() {
        let mut ctx = Context::new();
        let src = ctx.new_relation(2, "src").unwrap();
        let parts = ctx.new_elastic_relation(4, "parts").unwrap();
        let m = ctx.new_field(&parts, "m", Type::F64).unwrap();

        let spawn = ctx
            .new_kernel(
                "spawn",
                "s",
                vec![S::insert(
                    E::name("parts"),
                    vec![("m".to_string(), E::num(1.0))],
                )],
            )
            .unwrap();
        let cull = ctx
            .new_kernel(
                "cull",
                "p",
                vec![S::if_then(
                    E::name("p").dot("m").lt(E::num(0.5)),
                    vec![S::delete(E::name("p"))],
                )],
            )
            .unwrap();

        ctx.load_field(&m, 0.0);
        ctx.for_each(&spawn, &src).unwrap();
        ctx.for_each(&cull, &parts).unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        let region = h.machine().region(&"parts".into()).unwrap();
        // 4 original rows culled out of 6; occupancy 2/6 < 1/2 triggered
        // defragmentation
        assert_eq!(region.logical_rows(), 2);
        assert_eq!(region.concrete_rows(), 2);
        assert!(!region.fragmented);
        assert_eq!(h.field_f64("parts", "m", 0), 1.0);
        assert_eq!(h.field_f64("parts", "m", 1), 1.0);
    }

    #[test]
    fn test_assert_builtin_aborts_run() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(3, "r").unwrap();
        let x = ctx.new_field(&rel, "x", Type::F64).unwrap();
        let check = ctx
            .new_kernel(
                "check",
                "v",
                vec![S::expr(E::name("assert").call(vec![
                    E::name("v").dot("x").lt(E::num(1.0)),
                ]))],
            )
            .unwrap();
        ctx.load_field(&x, 2.0);
        ctx.for_each(&check, &rel).unwrap();

        let graph = tessel_dsl::compile(&ctx.finish().unwrap()).unwrap();
        let mut machine = Machine::new(graph);
        let err = machine.run().unwrap_err();
        assert!(matches!(
            err,
            tessel_runtime::Error::AssertionFailed { .. }
        ));
    }

    #[test]
    fn test_if_else_control_flow() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(4, "r").unwrap();
        let x = ctx.new_field(&rel, "x", Type::F64).unwrap();
        let flag = ctx
            .new_global("flag", Type::BOOL, ConstValue::Bool(true))
            .unwrap();
        let set_one = ctx
            .new_kernel(
                "set_one",
                "v",
                vec![S::assign(E::name("v").dot("x"), E::num(1.0))],
            )
            .unwrap();
        let set_two = ctx
            .new_kernel(
                "set_two",
                "v",
                vec![S::assign(E::name("v").dot("x"), E::num(2.0))],
            )
            .unwrap();

        ctx.load_field(&x, 0.0);
        ctx.if_(ControlCond::compare(
            CmpOp::Eq,
            get_global(&flag),
            ControlExpr::Const(ConstValue::Bool(true)),
        ));
        ctx.for_each(&set_one, &rel).unwrap();
        ctx.else_().unwrap();
        ctx.for_each(&set_two, &rel).unwrap();
        ctx.end().unwrap();

        let h = Harness::run(&ctx.finish().unwrap());
        for row in 0..4 {
            assert_eq!(h.field_f64("r", "x", row), 1.0);
        }
    }

    #[test]
    fn test_bundle_serialization_round_trip() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(8, "r").unwrap();
        let _g = ctx.new_global("g", Type::F64, 0.0).unwrap();
        let count = ctx
            .new_kernel(
                "count",
                "k",
                vec![S::reduce(E::name("g"), ReduceOp::Add, E::num(1.0))],
            )
            .unwrap();
        ctx.for_each(&count, &rel).unwrap();
        let program = ctx.finish().unwrap();

        let bytes = tessel_dsl::serialize_program(&program).unwrap();
        let restored = tessel_dsl::deserialize_program(&bytes).unwrap();

        let h = Harness::run(&restored);
        assert_eq!(h.global_f64("g"), 8.0);
    }

    #[test]
    fn test_kernel_task_memoized_across_launches() {
        let mut ctx = Context::new();
        let rel = ctx.new_relation(4, "r").unwrap();
        ctx.new_field(&rel, "x", Type::F64).unwrap();
        let bump = ctx
            .new_kernel(
                "bump",
                "v",
                vec![S::assign(
                    E::name("v").dot("x"),
                    E::name("v").dot("x").add(E::num(1.0)),
                )],
            )
            .unwrap();
        ctx.for_each(&bump, &rel).unwrap();
        ctx.for_each(&bump, &rel).unwrap();
        ctx.for_each(&bump, &rel).unwrap();

        let graph = tessel_dsl::compile(&ctx.finish().unwrap()).unwrap();
        // one specialization serves all three launches
        assert_eq!(graph.tasks.len(), 1);
    }
}
