//! Shared test fixtures.
//!
//! [`FunctionBuilder`] assembles instruction trees without going through the
//! IL reader. Every instruction it creates gets its own one-byte IL range, in
//! creation order, so sequence point tests can tell instructions apart by
//! offset. [`Fixture`] registers a small set of types and members in a
//! [`SimpleTypeSystem`].

use std::sync::Arc;

use crate::{
    il::{
        BinaryNumericOperator, CallKind, ComparisonKind, ContainerKind, Function, ILRange,
        InstrId, InstructionKind, VarId, VariableKind,
    },
    typesystem::{
        Field, Method, MethodReference, Parameter, PrimitiveKind, Property, Sign,
        SimpleTypeSystem, Token, Type, TypeKind, DISPOSABLE_NAME, DISPOSABLE_NAMESPACE,
    },
};

/// First method row handed out for ad-hoc callees, above the fixture's rows.
const ADHOC_METHOD_ROW: u32 = 0x1000;

/// Builds a function whose body is a single block.
pub struct FunctionBuilder {
    /// The function under construction.
    pub f: Function,
    block: InstrId,
    offset: u32,
    next_method: u32,
    locals: u16,
    params: u16,
    program: Type,
}

impl FunctionBuilder {
    pub fn new(name: &str, return_type: Type) -> Self {
        let mut f = Function::new(name, return_type);
        let block = f.create_block_with_label(0);
        let body = f.body();
        f.add_block(body, block).unwrap();
        FunctionBuilder {
            f,
            block,
            offset: 0,
            next_method: ADHOC_METHOD_ROW,
            locals: 0,
            params: 0,
            program: Type::definition(
                Token::from_parts(Token::TYPE_DEF, 0x100),
                "",
                "Program",
                TypeKind::Class,
                vec![],
            ),
        }
    }

    /// Creates a detached instruction with the next IL range.
    pub fn emit(&mut self, kind: InstructionKind) -> InstrId {
        let range = ILRange::new(self.offset, self.offset + 1);
        self.offset += 1;
        self.f.create_at(kind, range)
    }

    /// Appends `inst` to the body block.
    pub fn push(&mut self, inst: InstrId) {
        self.f.push_instruction(self.block, inst).unwrap();
    }

    pub fn local(&mut self, name: &str, ty: Type) -> VarId {
        let index = self.locals;
        self.locals += 1;
        self.f.add_variable(VariableKind::Local, ty, name, Some(index))
    }

    pub fn param(&mut self, name: &str, ty: Type) -> VarId {
        let index = self.params;
        self.params += 1;
        self.f.add_variable(VariableKind::Parameter, ty, name, Some(index))
    }

    pub fn this(&mut self, ty: Type) -> VarId {
        self.f.add_variable(VariableKind::This, ty, "this", None)
    }

    pub fn slot(&mut self, ty: Type) -> VarId {
        self.f.add_stack_slot(ty)
    }

    pub fn no_initial_value(&mut self, variable: VarId) {
        self.f.variable_mut(variable).has_initial_value = false;
    }

    pub fn ldc(&mut self, value: i32) -> InstrId {
        self.emit(InstructionKind::LdcI4(value))
    }

    pub fn ldstr(&mut self, value: &str) -> InstrId {
        self.emit(InstructionKind::LdStr(value.to_string()))
    }

    pub fn ldnull(&mut self) -> InstrId {
        self.emit(InstructionKind::LdNull)
    }

    pub fn ldloc(&mut self, variable: VarId) -> InstrId {
        self.emit(InstructionKind::LdLoc(variable))
    }

    pub fn ldloca(&mut self, variable: VarId) -> InstrId {
        self.emit(InstructionKind::LdLoca(variable))
    }

    /// Appends `stloc variable(value)` to the body block.
    pub fn stloc(&mut self, variable: VarId, value: InstrId) -> InstrId {
        let store = self.stloc_expr(variable, value);
        self.push(store);
        store
    }

    /// `stloc variable(value)`, detached.
    pub fn stloc_expr(&mut self, variable: VarId, value: InstrId) -> InstrId {
        self.emit(InstructionKind::StLoc { variable, value })
    }

    pub fn binary(&mut self, op: BinaryNumericOperator, left: InstrId, right: InstrId) -> InstrId {
        self.emit(InstructionKind::BinaryNumeric {
            op,
            left,
            right,
            check_overflow: false,
            sign: Sign::None,
        })
    }

    pub fn add(&mut self, left: InstrId, right: InstrId) -> InstrId {
        self.binary(BinaryNumericOperator::Add, left, right)
    }

    pub fn comp(&mut self, kind: ComparisonKind, left: InstrId, right: InstrId) -> InstrId {
        self.emit(InstructionKind::Comp {
            kind,
            sign: Sign::None,
            left,
            right,
        })
    }

    pub fn comp_ne(&mut self, left: InstrId, right: InstrId) -> InstrId {
        self.comp(ComparisonKind::Inequality, left, right)
    }

    pub fn conv(&mut self, argument: InstrId, target: PrimitiveKind) -> InstrId {
        self.emit(InstructionKind::Conv {
            argument,
            target,
            check_overflow: false,
            sign: Sign::None,
        })
    }

    pub fn isinst(&mut self, argument: InstrId, ty: Type) -> InstrId {
        self.emit(InstructionKind::IsInst { argument, ty })
    }

    /// An instance method of `ty` that no type system knows about.
    pub fn instance_method(
        &mut self,
        ty: &Type,
        name: &str,
        parameters: Vec<Type>,
        return_type: Type,
    ) -> Arc<MethodReference> {
        let token = Token::from_parts(Token::METHOD_DEF, self.next_method);
        self.next_method += 1;
        Arc::new(MethodReference::new(
            token,
            ty.clone(),
            name,
            true,
            parameters,
            return_type,
        ))
    }

    /// `call Program.name(arguments)` to an unresolvable static method.
    pub fn call_static(
        &mut self,
        name: &str,
        parameters: Vec<Type>,
        return_type: Type,
        arguments: Vec<InstrId>,
    ) -> InstrId {
        let token = Token::from_parts(Token::METHOD_DEF, self.next_method);
        self.next_method += 1;
        let method = Arc::new(MethodReference::new(
            token,
            self.program.clone(),
            name,
            false,
            parameters,
            return_type,
        ));
        self.call(&method, CallKind::Call, arguments)
    }

    pub fn call(
        &mut self,
        method: &Arc<MethodReference>,
        kind: CallKind,
        arguments: Vec<InstrId>,
    ) -> InstrId {
        self.emit(InstructionKind::Call {
            kind,
            method: Arc::clone(method),
            arguments,
        })
    }

    pub fn ldflda(&mut self, target: InstrId, field: &Arc<Field>) -> InstrId {
        self.emit(InstructionKind::LdFlda {
            target,
            field: Arc::clone(field),
        })
    }

    pub fn ldsflda(&mut self, field: &Arc<Field>) -> InstrId {
        self.emit(InstructionKind::LdsFlda {
            field: Arc::clone(field),
        })
    }

    pub fn ldobj(&mut self, target: InstrId, ty: Type) -> InstrId {
        self.emit(InstructionKind::LdObj { target, ty })
    }

    pub fn stobj(&mut self, target: InstrId, value: InstrId, ty: Type) -> InstrId {
        self.emit(InstructionKind::StObj { target, value, ty })
    }

    /// A detached control-flow block holding `statements`.
    pub fn block_of(&mut self, statements: Vec<InstrId>) -> InstrId {
        let block = self.f.create_block();
        for statement in statements {
            self.f.push_instruction(block, statement).unwrap();
        }
        block
    }

    /// `if (condition) body`, without else branch.
    pub fn if_then(&mut self, condition: InstrId, body: InstrId) -> InstrId {
        let nop = self.f.create(InstructionKind::Nop);
        self.emit(InstructionKind::IfInstruction {
            condition,
            true_inst: body,
            false_inst: nop,
        })
    }

    /// A normal container with one block: `statements; leave container`.
    pub fn container_of(&mut self, statements: Vec<InstrId>) -> InstrId {
        let container = self.f.create_container(ContainerKind::Normal);
        let block = self.block_of(statements);
        let nop = self.f.create(InstructionKind::Nop);
        let leave = self.emit(InstructionKind::Leave {
            target: container,
            value: nop,
        });
        self.f.push_instruction(block, leave).unwrap();
        self.f.add_block(container, block).unwrap();
        container
    }

    /// `try { try_statements } finally { finally_statements }`
    pub fn try_finally(
        &mut self,
        try_statements: Vec<InstrId>,
        finally_statements: Vec<InstrId>,
    ) -> InstrId {
        let try_block = self.container_of(try_statements);
        let finally_block = self.container_of(finally_statements);
        self.emit(InstructionKind::TryFinally {
            try_block,
            finally_block,
        })
    }

    /// Appends `leave body(value)`, the function return.
    pub fn ret(&mut self, value: Option<InstrId>) {
        let value = value.unwrap_or_else(|| self.f.create(InstructionKind::Nop));
        let target = self.f.body();
        let leave = self.emit(InstructionKind::Leave { target, value });
        self.push(leave);
    }

    /// The function and its body block.
    pub fn finish(self) -> (Function, InstrId) {
        (self.f, self.block)
    }
}

/// Types and members shared by transform and builder tests.
pub struct Fixture {
    pub ts: SimpleTypeSystem,
    /// `System.IDisposable`
    pub disposable: Type,
    /// `System.IDisposable.Dispose()`
    pub dispose: Arc<MethodReference>,
    /// `App.Resource : IDisposable`
    pub disposable_class: Type,
    /// `App.Handle : IDisposable`, a value type.
    pub disposable_struct: Type,
    /// `App.Counter` with properties `static int Count` and `int Value`.
    pub counter: Type,
    pub get_count: Arc<MethodReference>,
    pub set_count: Arc<MethodReference>,
    pub get_value: Arc<MethodReference>,
    pub set_value: Arc<MethodReference>,
    /// `static sbyte Counter.Level`
    pub get_level: Arc<MethodReference>,
    pub set_level: Arc<MethodReference>,
    /// `int Counter.value`
    pub value_field: Arc<Field>,
    /// `Counter Counter.inner`
    pub inner_field: Arc<Field>,
    /// `static int Counter.Hits`
    pub hits_field: Arc<Field>,
    /// `static byte Counter.Flags`
    pub flags_field: Arc<Field>,
}

impl Fixture {
    pub fn new() -> Self {
        let ts = SimpleTypeSystem::new();
        let type_token = |row| Token::from_parts(Token::TYPE_DEF, row);
        let disposable = Type::definition(
            type_token(1),
            DISPOSABLE_NAMESPACE,
            DISPOSABLE_NAME,
            TypeKind::Interface,
            vec![],
        );
        let disposable_class = Type::definition(
            type_token(2),
            "App",
            "Resource",
            TypeKind::Class,
            vec![disposable.clone()],
        );
        let disposable_struct = Type::definition(
            type_token(3),
            "App",
            "Handle",
            TypeKind::Struct,
            vec![disposable.clone()],
        );
        let counter = Type::definition(type_token(4), "App", "Counter", TypeKind::Class, vec![]);

        let dispose = Self::method(&ts, &disposable, 1, "Dispose", false, vec![], Type::Void, None);

        let count = Token::from_parts(Token::PROPERTY, 1);
        let get_count = Self::method(&ts, &counter, 2, "get_Count", true, vec![], Type::INT32, Some(count));
        let set_count = Self::method(
            &ts,
            &counter,
            3,
            "set_Count",
            true,
            vec![Type::INT32],
            Type::Void,
            Some(count),
        );
        Self::property(&ts, &counter, count, "Count", &get_count, &set_count);

        let value = Token::from_parts(Token::PROPERTY, 2);
        let get_value = Self::method(&ts, &counter, 4, "get_Value", false, vec![], Type::INT32, Some(value));
        let set_value = Self::method(
            &ts,
            &counter,
            5,
            "set_Value",
            false,
            vec![Type::INT32],
            Type::Void,
            Some(value),
        );
        Self::property(&ts, &counter, value, "Value", &get_value, &set_value);

        let level = Token::from_parts(Token::PROPERTY, 3);
        let sbyte: Type = PrimitiveKind::I1.into();
        let get_level = Self::method(&ts, &counter, 6, "get_Level", true, vec![], sbyte.clone(), Some(level));
        let set_level = Self::method(
            &ts,
            &counter,
            7,
            "set_Level",
            true,
            vec![sbyte],
            Type::Void,
            Some(level),
        );
        Self::property(&ts, &counter, level, "Level", &get_level, &set_level);

        let field = |row, name: &str, ty: Type, is_static| {
            ts.add_field(Field {
                token: Token::from_parts(Token::FIELD, row),
                name: name.to_string(),
                declaring_type: counter.clone(),
                ty,
                is_static,
            })
            .unwrap()
        };
        let value_field = field(1, "value", Type::INT32, false);
        let inner_field = field(2, "inner", counter.clone(), false);
        let hits_field = field(3, "Hits", Type::INT32, true);
        let flags_field = field(4, "Flags", PrimitiveKind::U1.into(), true);

        Fixture {
            ts,
            disposable,
            dispose,
            disposable_class,
            disposable_struct,
            counter,
            get_count,
            set_count,
            get_value,
            set_value,
            get_level,
            set_level,
            value_field,
            inner_field,
            hits_field,
            flags_field,
        }
    }

    /// Registers a method definition and returns a reference to it.
    #[allow(clippy::too_many_arguments)]
    fn method(
        ts: &SimpleTypeSystem,
        declaring_type: &Type,
        row: u32,
        name: &str,
        is_static: bool,
        parameters: Vec<Type>,
        return_type: Type,
        accessor_owner: Option<Token>,
    ) -> Arc<MethodReference> {
        let token = Token::from_parts(Token::METHOD_DEF, row);
        ts.add_method(Method {
            token,
            name: name.to_string(),
            declaring_type: declaring_type.clone(),
            parameters: parameters
                .iter()
                .map(|ty| Parameter {
                    name: "value".to_string(),
                    ty: ty.clone(),
                })
                .collect(),
            return_type: return_type.clone(),
            is_static,
            accessor_owner,
        })
        .unwrap();
        Arc::new(MethodReference::new(
            token,
            declaring_type.clone(),
            name,
            !is_static,
            parameters,
            return_type,
        ))
    }

    fn property(
        ts: &SimpleTypeSystem,
        declaring_type: &Type,
        token: Token,
        name: &str,
        getter: &MethodReference,
        setter: &MethodReference,
    ) {
        ts.add_property(Property {
            token,
            name: name.to_string(),
            declaring_type: declaring_type.clone(),
            ty: getter.signature.return_type.clone(),
            getter: Some(getter.token),
            setter: Some(setter.token),
        })
        .unwrap();
    }
}
