//! End-to-end decompilation scenarios: module in, IR and pseudo-source out.

use hlb::opcodes::{Opcode, Reg, RefField, RefFun, RefInt, RefType};
use hlb::types::{ObjField, ObjProto, Type, TypeFun, TypeObj};
use hlb::{Function, Module};
use hlir::ir::{CallTarget, ExprKind, LoopKind, Stmt};
use hlir::{cfg_of, ir_of, pseudo_of};

/// Every emitted line is a statement, a label, or a brace line, and braces
/// balance. A recursive-descent parser over the IR grammar accepts exactly
/// this shape.
fn assert_well_formed(text: &str) {
    let mut depth = 0i64;
    for line in text.lines() {
        let t = line.trim_end();
        let trimmed = t.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        assert!(
            trimmed.ends_with('{')
                || trimmed.ends_with('}')
                || trimmed.ends_with(';')
                || trimmed.ends_with(':')
                || trimmed.ends_with("*/"),
            "unterminated line {trimmed:?} in:\n{text}"
        );
        for c in trimmed.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    assert!(depth >= 0, "unbalanced braces in:\n{text}");
                }
                _ => {}
            }
        }
    }
    assert_eq!(depth, 0, "unbalanced braces in:\n{text}");
}

fn base_types() -> Vec<Type> {
    vec![
        Type::Void,                                                 // 0
        Type::I32,                                                  // 1
        Type::Bool,                                                 // 2
        Type::Fun(TypeFun { args: vec![], ret: RefType(0) }),       // 3: () -> Void
        Type::Fun(TypeFun { args: vec![], ret: RefType(1) }),       // 4: () -> Int
        Type::Fun(TypeFun {
            args: vec![RefType(1)],
            ret: RefType(1),
        }),                                                         // 5: Int -> Int
        Type::Dyn,                                                  // 6
    ]
}

fn module_with(ints: Vec<i32>, functions: Vec<Function>) -> Module {
    let mut m = Module::new(4);
    m.ints = ints;
    m.types = base_types();
    m.functions = functions;
    m
}

#[test]
fn scenario_empty_program() {
    let m = module_with(
        vec![],
        vec![Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(0)],
            vec![Opcode::Ret { ret: Reg(0) }],
        )],
    );
    let ir = ir_of(&m, RefFun(0)).unwrap();
    assert_eq!(ir, vec![Stmt::Return(None)]);
    let text = pseudo_of(&m, RefFun(0)).unwrap();
    assert!(text.contains("function f@0(): Void {"), "{text}");
    assert!(text.contains("return;"), "{text}");
    assert_well_formed(&text);
}

#[test]
fn scenario_arithmetic() {
    // b = 10; b = b - 5; return b
    let m = module_with(
        vec![10, 5],
        vec![Function::new(
            RefType(4),
            RefFun(0),
            vec![RefType(1), RefType(1)],
            vec![
                Opcode::Int { dst: Reg(0), ptr: RefInt(0) },
                Opcode::Int { dst: Reg(1), ptr: RefInt(1) },
                Opcode::Sub { dst: Reg(0), a: Reg(0), b: Reg(1) },
                Opcode::Ret { ret: Reg(0) },
            ],
        )],
    );
    let ir = ir_of(&m, RefFun(0)).unwrap();
    let assigns = ir.iter().filter(|s| matches!(s, Stmt::Assign { .. })).count();
    assert!(assigns >= 2, "{ir:?}");
    match ir.last().unwrap() {
        Stmt::Return(Some(e)) => {
            assert!(matches!(e.kind, ExprKind::Local { .. }), "{e:?}")
        }
        other => panic!("expected return of a local, got {other:?}"),
    }
    assert_well_formed(&pseudo_of(&m, RefFun(0)).unwrap());
}

#[test]
fn scenario_if_else_diamond() {
    // if (a > 5) result = a * 2 else result = a + 2
    let m = module_with(
        vec![5, 2],
        vec![Function::new(
            RefType(5),
            RefFun(0),
            vec![RefType(1); 4],
            vec![
                Opcode::Int { dst: Reg(2), ptr: RefInt(0) },       // 0: r2 = 5
                Opcode::JSGt { a: Reg(0), b: Reg(2), offset: 3 },  // 1: -> 5
                Opcode::Int { dst: Reg(3), ptr: RefInt(1) },       // 2
                Opcode::Add { dst: Reg(1), a: Reg(0), b: Reg(3) }, // 3
                Opcode::JAlways { offset: 2 },                     // 4: -> 7
                Opcode::Int { dst: Reg(3), ptr: RefInt(1) },       // 5
                Opcode::Mul { dst: Reg(1), a: Reg(0), b: Reg(3) }, // 6
                Opcode::Ret { ret: Reg(1) },                       // 7
            ],
        )],
    );
    assert_eq!(cfg_of(&m, RefFun(0)).unwrap().blocks.len(), 4);
    let ir = ir_of(&m, RefFun(0)).unwrap();
    let cond = ir
        .iter()
        .find_map(|s| match s {
            Stmt::If { then_blk, else_blk, .. } => Some((then_blk.len(), else_blk.len())),
            _ => None,
        })
        .expect("no conditional recovered");
    assert_eq!(cond, (2, 2), "{ir:?}");
    assert!(matches!(ir.last(), Some(Stmt::Return(Some(_)))));
    let text = pseudo_of(&m, RefFun(0)).unwrap();
    assert!(text.contains("if ("), "{text}");
    assert!(text.contains("} else {"), "{text}");
    assert_well_formed(&text);
}

#[test]
fn scenario_while_loop() {
    // z = 0; while (z < 5) { result = result + (z + 3); z++ } return result
    let m = module_with(
        vec![0, 5, 3],
        vec![Function::new(
            RefType(4),
            RefFun(0),
            vec![RefType(1); 5],
            vec![
                Opcode::Int { dst: Reg(1), ptr: RefInt(0) },       // 0: z = 0
                Opcode::Int { dst: Reg(2), ptr: RefInt(1) },       // 1: r2 = 5
                Opcode::Label,                                     // 2
                Opcode::JSGte { a: Reg(1), b: Reg(2), offset: 5 }, // 3: -> 9
                Opcode::Int { dst: Reg(3), ptr: RefInt(2) },       // 4: r3 = 3
                Opcode::Add { dst: Reg(4), a: Reg(1), b: Reg(3) }, // 5
                Opcode::Add { dst: Reg(0), a: Reg(0), b: Reg(4) }, // 6
                Opcode::Incr { dst: Reg(1) },                      // 7
                Opcode::JAlways { offset: -7 },                    // 8: -> 2
                Opcode::Ret { ret: Reg(0) },                       // 9
            ],
        )],
    );
    let cfg = cfg_of(&m, RefFun(0)).unwrap();
    // Pre-block, header, body, exit; the back edge targets the header.
    assert_eq!(cfg.blocks.len(), 4);
    let header = cfg.block_of[2];
    assert!(cfg.blocks[header].predecessors.len() == 2);

    let ir = ir_of(&m, RefFun(0)).unwrap();
    let found = ir.iter().any(|s| {
        matches!(s, Stmt::Loop { kind: LoopKind::PreTested, cond: Some(_), body, .. } if body.len() == 4)
    });
    assert!(found, "{ir:?}");
    let text = pseudo_of(&m, RefFun(0)).unwrap();
    assert!(text.contains("while ("), "{text}");
    assert_well_formed(&text);
}

#[test]
fn scenario_virtual_closure_call() {
    // this.h.run() via OGetThis / OVirtualClosure / OCallClosure.
    let mut m = Module::new(4);
    m.strings = vec!["Main".into(), "h".into(), "Handler".into(), "run".into()];
    m.types = vec![
        Type::Void, // 0
        Type::I32,  // 1
        Type::Obj(TypeObj {
            name: hlb::opcodes::RefString(0),
            super_: None,
            global: None,
            fields: vec![ObjField { name: hlb::opcodes::RefString(1), ty: RefType(3) }],
            protos: vec![],
            bindings: vec![],
        }), // 2: Main
        Type::Obj(TypeObj {
            name: hlb::opcodes::RefString(2),
            super_: None,
            global: None,
            fields: vec![],
            protos: vec![ObjProto {
                name: hlb::opcodes::RefString(3),
                findex: RefFun(1),
                pindex: 0,
            }],
            bindings: vec![],
        }), // 3: Handler with run()
        Type::Method(TypeFun { args: vec![RefType(2)], ret: RefType(1) }), // 4
        Type::Fun(TypeFun { args: vec![RefType(3)], ret: RefType(1) }),    // 5
    ];
    m.functions = vec![
        Function::new(
            RefType(4),
            RefFun(0),
            vec![RefType(2), RefType(3), RefType(5), RefType(1)],
            vec![
                Opcode::GetThis { dst: Reg(1), field: RefField(0) },
                Opcode::VirtualClosure { dst: Reg(2), obj: Reg(1), field: Reg(0) },
                Opcode::CallClosure { dst: Reg(3), fun: Reg(2), args: vec![] },
                Opcode::Ret { ret: Reg(3) },
            ],
        ),
        Function::new(
            RefType(5),
            RefFun(1),
            vec![RefType(3), RefType(1)],
            vec![Opcode::Ret { ret: Reg(1) }],
        ),
    ];

    let ir = ir_of(&m, RefFun(0)).unwrap();
    assert_eq!(ir.len(), 2, "{ir:?}");
    match &ir[0] {
        Stmt::Assign { src, .. } => match &src.kind {
            ExprKind::Call { target: CallTarget::Closure(c), args } => {
                assert!(args.is_empty());
                match &c.kind {
                    ExprKind::Closure { fun, bound } => {
                        assert_eq!(*fun, RefFun(1));
                        assert!(matches!(bound.as_ref().unwrap().kind, ExprKind::Field { .. }));
                    }
                    other => panic!("expected bound closure, got {other:?}"),
                }
            }
            other => panic!("expected closure call, got {other:?}"),
        },
        other => panic!("expected assign, got {other:?}"),
    }
    let text = pseudo_of(&m, RefFun(0)).unwrap();
    assert!(text.contains("this.h.run()"), "{text}");
    assert_well_formed(&text);
}

#[test]
fn scenario_try_catch() {
    // try { q = a / b } catch (err) { err = caught }
    let m = module_with(
        vec![],
        vec![Function::new(
            RefType(5),
            RefFun(0),
            vec![RefType(1), RefType(1), RefType(6), RefType(1), RefType(6)],
            vec![
                Opcode::Trap { exc: Reg(2), offset: 3 },            // 0: handler -> 4
                Opcode::SDiv { dst: Reg(3), a: Reg(0), b: Reg(1) }, // 1
                Opcode::EndTrap { exc: Reg(2) },                    // 2
                Opcode::JAlways { offset: 1 },                      // 3: -> 5
                Opcode::Mov { dst: Reg(4), src: Reg(2) },           // 4
                Opcode::Ret { ret: Reg(3) },                        // 5
            ],
        )],
    );
    let cfg = cfg_of(&m, RefFun(0)).unwrap();
    assert_eq!(cfg.traps.len(), 1);
    assert_eq!(cfg.traps[0].handler, 4);

    let ir = ir_of(&m, RefFun(0)).unwrap();
    match &ir[0] {
        Stmt::Try { body, catches } => {
            assert_eq!(body.len(), 1);
            assert_eq!(catches.len(), 1);
            let (var, blk) = &catches[0];
            assert!(matches!(var.kind, ExprKind::Local { .. }));
            assert_eq!(blk.len(), 1);
        }
        other => panic!("expected try, got {other:?}"),
    }
    let text = pseudo_of(&m, RefFun(0)).unwrap();
    assert!(text.contains("try {"), "{text}");
    assert!(text.contains("} catch ("), "{text}");
    assert_well_formed(&text);
}

#[test]
fn decompiling_every_function_of_a_parsed_module() {
    // The decompiler runs over the codec's output, not just hand-built
    // modules.
    let m = module_with(
        vec![1, 2],
        vec![
            Function::new(
                RefType(4),
                RefFun(0),
                vec![RefType(1)],
                vec![
                    Opcode::Int { dst: Reg(0), ptr: RefInt(0) },
                    Opcode::Ret { ret: Reg(0) },
                ],
            ),
            Function::new(
                RefType(3),
                RefFun(1),
                vec![RefType(0)],
                vec![Opcode::Ret { ret: Reg(0) }],
            ),
        ],
    );
    let bytes = hlb::serialize(&m).unwrap();
    let parsed = hlb::parse(&bytes).unwrap();
    for f in &parsed.functions {
        let text = pseudo_of(&parsed, f.findex()).unwrap();
        assert_well_formed(&text);
    }
}
