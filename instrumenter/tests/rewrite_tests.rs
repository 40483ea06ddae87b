use umad_instrumenter::bytecode::opcode::*;
use umad_instrumenter::bytecode::{self, Code, Instruction, Label, Operand};
use umad_instrumenter::classfile::{
    Constant, ExceptionEntry, FrameKind, LineNumberEntry, LocalVariableEntry, StackMapFrame, ACC_STATIC,
};
use umad_instrumenter::config::{LOCK_DESCRIPTOR, RECORD_WRITE_DESCRIPTOR};
use umad_instrumenter::{
    CodeAttribute, CompiledUnit, ConstantPool, InstrumentError, MethodBody, MethodOutcome, Rewriter,
    RewriterConfig, SkipReason,
};

struct Fixture {
    unit: CompiledUnit,
    value_field: u16,
    total_field: u16,
}

fn fixture(source_file: Option<&str>) -> Fixture {
    let mut pool = ConstantPool::new();
    let value_field = pool.add_fieldref("com/acme/Counter", "value", "I").unwrap();
    let total_field = pool.add_fieldref("com/acme/Counter", "total", "J").unwrap();
    Fixture {
        unit: CompiledUnit {
            name: "com/acme/Counter".to_owned(),
            source_file: source_file.map(str::to_owned),
            constant_pool: pool,
            methods: Vec::new(),
        },
        value_field,
        total_field,
    }
}

fn method(name: &str, descriptor: &str, access_flags: u16, code: CodeAttribute) -> MethodBody {
    MethodBody {
        access_flags,
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        code: Some(code),
    }
}

fn attribute(code: Vec<u8>, max_stack: u16, max_locals: u16) -> CodeAttribute {
    CodeAttribute {
        max_stack,
        max_locals,
        code,
        ..Default::default()
    }
}

fn hi(index: u16) -> u8 {
    (index >> 8) as u8
}

fn lo(index: u16) -> u8 {
    index as u8
}

fn decoded(method: &MethodBody) -> Code {
    bytecode::decode(method.code.as_ref().unwrap()).unwrap()
}

fn opcodes(code: &Code) -> Vec<u8> {
    code.instructions.iter().map(|i| i.opcode).collect()
}

fn has_string(pool: &ConstantPool, value: &str) -> bool {
    let mut lookup = pool.clone();
    let before = lookup.len();
    lookup.add_string(value).unwrap();
    lookup.len() == before
}

fn string_at(pool: &ConstantPool, instruction: &Instruction) -> String {
    let Operand::Constant(index) = instruction.operand else {
        panic!("not a constant load: {instruction:?}");
    };
    match pool.get(index).unwrap() {
        Constant::String { value } => pool.utf8(*value).unwrap().to_owned(),
        other => panic!("not a string: {other:?}"),
    }
}

#[test]
fn instance_field_store_is_wrapped() {
    umad_instrumenter::init_tracing();
    let mut fx = fixture(Some("Counter.java"));
    let f = fx.value_field;
    let mut setter = attribute(vec![ALOAD_0, ILOAD_1, PUTFIELD, hi(f), lo(f), RETURN], 2, 2);
    setter.line_numbers = vec![LineNumberEntry { start_pc: 0, line: 7 }];
    fx.unit.methods.push(method("setValue", "(I)V", 0, setter));

    let report = Rewriter::default().rewrite_unit(&mut fx.unit);
    assert_eq!(report.instrumented, vec!["com/acme/Counter.setValue(I)V".to_owned()]);
    assert!(report.failed.is_empty());

    let rewritten = fx.unit.methods[0].code.as_ref().unwrap();
    assert_eq!(rewritten.max_locals, 5);
    assert_eq!(rewritten.max_stack, 4);

    let code = decoded(&fx.unit.methods[0]);
    assert_eq!(
        opcodes(&code),
        vec![ALOAD_0, ILOAD_1, ISTORE, DUP, LDC, LDC, INVOKESTATIC, ILOAD, PUTFIELD, RETURN]
    );
    assert_eq!(code.instructions[2], Instruction::local(ISTORE, 2));
    assert_eq!(code.instructions[7], Instruction::local(ILOAD, 2));
    let pool = &fx.unit.constant_pool;
    assert_eq!(string_at(pool, &code.instructions[4]), "com.acme.Counter.value");
    assert_eq!(string_at(pool, &code.instructions[5]), "Counter.java:7");

    let mut lookup = pool.clone();
    let before = lookup.len();
    lookup
        .add_methodref("umad/runtime/AccessMonitor", "recordWrite", RECORD_WRITE_DESCRIPTOR)
        .unwrap();
    assert_eq!(lookup.len(), before);
}

#[test]
fn synchronized_block_keeps_handlers_and_lock_balance() {
    let mut fx = fixture(Some("Counter.java"));
    let f = fx.value_field;
    // synchronized (this) { value = 1; }
    let bytes = vec![
        ALOAD_0, DUP, ASTORE_1, MONITORENTER, // 0..3
        ALOAD_0, ICONST_1, PUTFIELD, hi(f), lo(f), // 4..8
        ALOAD_1, MONITOREXIT, // 9, 10
        GOTO, 0x00, 0x08, // 11 -> 19
        ASTORE_2, ALOAD_1, MONITOREXIT, ALOAD_2, ATHROW, // 14..18
        RETURN, // 19
    ];
    let mut body = attribute(bytes, 2, 3);
    body.exception_table = vec![ExceptionEntry {
        start_pc: 4,
        end_pc: 11,
        handler_pc: 14,
        catch_type: 0,
    }];
    fx.unit.methods.push(method("bump", "()V", 0, body));

    let report = Rewriter::default().rewrite_unit(&mut fx.unit);
    assert_eq!(report.instrumented.len(), 1);

    let code = decoded(&fx.unit.methods[0]);
    assert_eq!(
        opcodes(&code),
        vec![
            ALOAD_0, DUP, ASTORE_1, DUP, INVOKESTATIC, MONITORENTER,
            ALOAD_0, ICONST_1, ISTORE, DUP, LDC, LDC, INVOKESTATIC, ILOAD, PUTFIELD,
            ALOAD_1, DUP, INVOKESTATIC, MONITOREXIT,
            GOTO,
            ASTORE_2, ALOAD_1, DUP, INVOKESTATIC, MONITOREXIT, ALOAD_2, ATHROW,
            RETURN,
        ]
    );
    assert_eq!(code.instructions[19], Instruction::branch(GOTO, Label(27)));
    assert_eq!(code.handlers.len(), 1);
    assert_eq!(code.handlers[0].start, Label(6));
    assert_eq!(code.handlers[0].end, Label(19));
    assert_eq!(code.handlers[0].handler, Label(20));
    assert_eq!(code.max_locals, 6);
    assert_eq!(code.max_stack, 4);

    let mut lookup = fx.unit.constant_pool.clone();
    let add_lock = lookup
        .add_methodref("umad/runtime/AccessMonitor", "addLock", LOCK_DESCRIPTOR)
        .unwrap();
    let remove_lock = lookup
        .add_methodref("umad/runtime/AccessMonitor", "removeLock", LOCK_DESCRIPTOR)
        .unwrap();
    assert_eq!(lookup.len(), fx.unit.constant_pool.len());
    assert_eq!(code.instructions[4], Instruction::constant(INVOKESTATIC, add_lock));
    assert_eq!(code.instructions[17], Instruction::constant(INVOKESTATIC, remove_lock));
    assert_eq!(code.instructions[23], Instruction::constant(INVOKESTATIC, remove_lock));
}

#[test]
fn stack_map_and_local_ranges_follow_injected_code() {
    let mut fx = fixture(Some("Counter.java"));
    let f = fx.value_field;
    // if (flag) value = 1; else value = 2;
    let bytes = vec![
        ILOAD_1, IFEQ, 0x00, 0x0b, // 0, 1 -> 12
        ALOAD_0, ICONST_1, PUTFIELD, hi(f), lo(f), // 4..8
        GOTO, 0x00, 0x08, // 9 -> 17
        ALOAD_0, ICONST_2, PUTFIELD, hi(f), lo(f), // 12..16
        RETURN, // 17
    ];
    let mut choose = attribute(bytes, 2, 2);
    choose.stack_map = vec![
        StackMapFrame {
            offset_delta: 12,
            kind: FrameKind::Same,
        },
        StackMapFrame {
            offset_delta: 4,
            kind: FrameKind::Same,
        },
    ];
    let this = LocalVariableEntry {
        start_pc: 0,
        length: 18,
        name: 1,
        descriptor: 2,
        index: 0,
    };
    choose.local_variables = vec![this, LocalVariableEntry { index: 1, ..this }];
    fx.unit.methods.push(method("choose", "(Z)V", 0, choose));

    let report = Rewriter::default().rewrite_unit(&mut fx.unit);
    assert_eq!(report.instrumented.len(), 1);

    let rewritten = fx.unit.methods[0].code.as_ref().unwrap();
    // each store gained twelve bytes: istore, dup, two ldc, invokestatic, iload
    assert_eq!(rewritten.code.len(), 18 + 24);
    let deltas: Vec<u16> = rewritten.stack_map.iter().map(|frame| frame.offset_delta).collect();
    assert_eq!(deltas, vec![24, 16]);
    assert_eq!(rewritten.code[24], ALOAD_0);
    assert_eq!(rewritten.code[41], RETURN);
    for variable in &rewritten.local_variables {
        assert_eq!((variable.start_pc, variable.length), (0, 42));
    }

    let code = decoded(&fx.unit.methods[0]);
    assert_eq!(code.instructions[1], Instruction::branch(IFEQ, Label(12)));
    assert_eq!(code.instructions[11], Instruction::branch(GOTO, Label(21)));
    assert_eq!(code.frames[0].at, Label(12));
    assert_eq!(code.frames[1].at, Label(21));
}

#[test]
fn static_initializer_store_passes_null_owner() {
    let mut fx = fixture(None);
    let long = fx.unit.constant_pool.push(Constant::Long(5)).unwrap();
    let t = fx.total_field;
    let clinit = attribute(
        vec![LDC2_W, hi(long), lo(long), PUTSTATIC, hi(t), lo(t), RETURN],
        2,
        0,
    );
    fx.unit.methods.push(method("<clinit>", "()V", ACC_STATIC, clinit.clone()));

    let mut skipping = fx.unit.clone();
    let report = Rewriter::new(RewriterConfig {
        skip_static_initializers: true,
        ..Default::default()
    })
    .rewrite_unit(&mut skipping);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].1, SkipReason::StaticInitializer);
    assert_eq!(skipping.methods[0].code.as_ref(), Some(&clinit));

    Rewriter::default().rewrite_unit(&mut fx.unit);
    let code = decoded(&fx.unit.methods[0]);
    assert_eq!(
        opcodes(&code),
        vec![LDC2_W, LSTORE, ACONST_NULL, LDC, LDC, INVOKESTATIC, LLOAD, PUTSTATIC, RETURN]
    );
    assert_eq!(code.instructions[1], Instruction::local(LSTORE, 0));
    assert_eq!(code.max_locals, 3);
    assert_eq!(code.max_stack, 3);
    let pool = &fx.unit.constant_pool;
    assert_eq!(string_at(pool, &code.instructions[3]), "com.acme.Counter.total");
    // no SourceFile attribute and no line table
    assert_eq!(string_at(pool, &code.instructions[4]), "Counter.java:-1");
}

#[test]
fn array_store_spills_index_and_value() {
    let mut fx = fixture(Some("Counter.java"));
    let mut fill = attribute(vec![ALOAD_1, ILOAD_2, ILOAD_3, IASTORE, RETURN], 3, 4);
    fill.line_numbers = vec![LineNumberEntry { start_pc: 0, line: 21 }];
    fx.unit.methods.push(method("fill", "([III)V", 0, fill));

    Rewriter::default().rewrite_unit(&mut fx.unit);
    let code = decoded(&fx.unit.methods[0]);
    assert_eq!(
        opcodes(&code),
        vec![ALOAD_1, ILOAD_2, ILOAD_3, ISTORE, ISTORE, DUP, LDC, LDC, INVOKESTATIC, ILOAD, ILOAD, IASTORE, RETURN]
    );
    assert_eq!(code.instructions[3], Instruction::local(ISTORE, 4));
    assert_eq!(code.instructions[4], Instruction::local(ISTORE, 6));
    assert_eq!(code.instructions[9], Instruction::local(ILOAD, 6));
    assert_eq!(code.instructions[10], Instruction::local(ILOAD, 4));
    assert_eq!(code.max_stack, 4);
    let pool = &fx.unit.constant_pool;
    assert_eq!(string_at(pool, &code.instructions[6]), "");
    assert_eq!(string_at(pool, &code.instructions[7]), "Counter.java:21");
    assert!(has_string(pool, "Counter.java:21"));
}

#[test]
fn constructors_bodyless_and_read_only_methods_are_left_alone() {
    let mut fx = fixture(Some("Counter.java"));
    let f = fx.value_field;
    let init = attribute(vec![ALOAD_0, ICONST_0, PUTFIELD, hi(f), lo(f), RETURN], 2, 1);
    let getter = attribute(vec![ALOAD_0, GETFIELD, hi(f), lo(f), IRETURN], 1, 1);
    fx.unit.methods.push(method("<init>", "()V", 0, init.clone()));
    fx.unit.methods.push(method("getValue", "()I", 0, getter.clone()));
    fx.unit.methods.push(MethodBody {
        access_flags: 0x0400,
        name: "reset".to_owned(),
        descriptor: "()V".to_owned(),
        code: None,
    });
    let pool_before = fx.unit.constant_pool.clone();

    let report = Rewriter::default().rewrite_unit(&mut fx.unit);
    let reasons: Vec<SkipReason> = report.skipped.iter().map(|(_, reason)| *reason).collect();
    assert_eq!(
        reasons,
        vec![SkipReason::Constructor, SkipReason::NoTargets, SkipReason::NoBody]
    );
    assert!(report.instrumented.is_empty());
    assert_eq!(fx.unit.methods[0].code.as_ref(), Some(&init));
    assert_eq!(fx.unit.methods[1].code.as_ref(), Some(&getter));
    assert_eq!(fx.unit.constant_pool, pool_before);
}

#[test]
fn broken_method_is_reported_and_left_unchanged() {
    let mut fx = fixture(Some("Counter.java"));
    let f = fx.value_field;
    // pop on an empty stack
    let broken = attribute(vec![POP, ALOAD_0, ICONST_1, PUTFIELD, hi(f), lo(f), RETURN], 2, 1);
    let fine = attribute(vec![ALOAD_0, ICONST_1, PUTFIELD, hi(f), lo(f), RETURN], 2, 1);
    fx.unit.methods.push(method("broken", "()V", 0, broken.clone()));
    fx.unit.methods.push(method("fine", "()V", 0, fine.clone()));

    let report = Rewriter::default().rewrite_unit(&mut fx.unit);
    assert_eq!(
        report.failed,
        vec![(
            "com/acme/Counter.broken()V".to_owned(),
            InstrumentError::StackUnderflow { index: 0 }
        )]
    );
    assert_eq!(report.instrumented, vec!["com/acme/Counter.fine()V".to_owned()]);
    assert_eq!(fx.unit.methods[0].code.as_ref(), Some(&broken));

    let direct = Rewriter::default().rewrite_method(
        "Counter.java",
        &mut fx.unit.constant_pool,
        &mut method("fine", "()V", 0, fine),
    );
    assert!(matches!(direct, Ok(MethodOutcome::Instrumented { sites: 1 })));
}
