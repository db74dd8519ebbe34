//! Opcode interpreter
//!
//! Runs the bodies of macro-defined methods. A frame is laid out on the
//! engine's call stack as:
//!
//! ```text
//! [return slot] [parm 0] .. [parm n-1] [method call] [local 0] .. [local m-1] [work area]
//!                                                     ^ base
//! ```
//!
//! Locals are created fresh on entry and freed when the frame pops back to
//! its base. A thrown macro exception is caught by the nearest try marker at
//! or above the base; otherwise it leaves the frame as an ordinary `Err`.

mod macro_class;
mod method_impl;
mod opcode;

pub use macro_class::MacroClass;
pub use method_impl::{LocalInfo, OpMethodImpl};
pub use opcode::OpCode;

use std::fmt;

use crate::class::MethodInfo;
use crate::collections;
use crate::engine::{Dispatch, Engine};
use crate::error::{EngineError, EngineResult};
use crate::intrinsics::EnumVal;
use crate::stack::{CallerInfo, StackItemType};
use crate::value::{Constness, ValueId};
use crate::{ClassId, MethodId};

/// Run an opcode body against `this`
///
/// The caller has already pushed the return slot, parameters and method call
/// item. The stack is popped back to its entry height whatever the outcome.
///
/// # Errors
///
/// `EngineError::Thrown` for exceptions not caught inside the body, other
/// variants for host failures.
pub fn run(
    engine: &mut Engine,
    class_id: ClassId,
    method: &MethodInfo,
    this: ValueId,
    body: &OpMethodImpl,
) -> EngineResult<()> {
    let base = engine.stack_top();
    let result = Frame::enter(engine, class_id, method, this, body, base).and_then(|mut frame| frame.run(engine));
    let unwound = engine.pop_back_to(base);
    result.and(unwound)
}

enum Flow {
    Next,
    Return,
}

struct Frame<'a> {
    class_id: ClassId,
    method: &'a MethodInfo,
    this: ValueId,
    body: &'a OpMethodImpl,
    base: usize,
    first_parm: usize,
    ip: usize,
}

impl<'a> Frame<'a> {
    fn enter(
        engine: &mut Engine,
        class_id: ClassId,
        method: &'a MethodInfo,
        this: ValueId,
        body: &'a OpMethodImpl,
        base: usize,
    ) -> EngineResult<Self> {
        let first_parm = engine.first_parm_index(method)?;
        for local in &body.locals {
            let value = engine.construct(local.class_id, &local.name)?;
            engine.value_mut(value)?.set_constness(local.constness);
            if let Err(err) = engine.push_value(value, StackItemType::Local) {
                engine.free_value(value)?;
                return Err(err);
            }
        }
        Ok(Self {
            class_id,
            method,
            this,
            body,
            base,
            first_parm,
            ip: 0,
        })
    }

    fn run(&mut self, engine: &mut Engine) -> EngineResult<()> {
        loop {
            match self.step(engine) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return) => return Ok(()),
                Err(EngineError::Thrown(exc)) => match engine.stack().find_next_try() {
                    Some((index, catch_ip)) if index >= self.base => {
                        engine.pop_back_to(index)?;
                        tracing::debug!(
                            target: "cml::interp",
                            method = %self.method.name,
                            error = %exc.error_name,
                            catch_ip,
                            "caught"
                        );
                        engine.set_thrown(*exc)?;
                        self.jump(catch_ip)?;
                    }
                    _ => return Err(EngineError::Thrown(exc)),
                },
                Err(err) => return Err(err),
            }
        }
    }

    fn jump(&mut self, target: u32) -> EngineResult<()> {
        let target = target as usize;
        if target > self.body.opcodes.len() {
            return Err(EngineError::BadIp {
                ip: target,
                method: self.method.name.clone(),
            });
        }
        self.ip = target;
        Ok(())
    }

    fn local_index(&self, engine: &Engine, local: u16) -> EngineResult<usize> {
        let local = usize::from(local);
        if local >= self.body.locals.len() {
            return Err(EngineError::BadStackIndex {
                index: self.base + local,
                top: engine.stack_top(),
            });
        }
        Ok(self.base + local)
    }

    fn parm_index(&self, engine: &Engine, parm: u16) -> EngineResult<usize> {
        let parm = usize::from(parm);
        if parm >= self.method.parm_count() {
            return Err(EngineError::BadStackIndex {
                index: self.first_parm + parm,
                top: engine.stack_top(),
            });
        }
        Ok(self.first_parm + parm)
    }

    fn member(&self, engine: &Engine, member: u16) -> EngineResult<ValueId> {
        let value = engine.value(self.this)?;
        value.member(usize::from(member)).ok_or_else(|| EngineError::BadMemberIndex {
            index: usize::from(member),
            class_path: engine.registry().path_of(value.class_id()).to_string(),
        })
    }

    /// Index of the slot `offset` below the top; 1 is the top slot
    fn from_top(engine: &Engine, offset: usize) -> EngineResult<usize> {
        engine
            .stack_top()
            .checked_sub(offset)
            .filter(|_| offset > 0)
            .ok_or(EngineError::StackUnderflow)
    }

    fn call(
        &self,
        engine: &mut Engine,
        target: ValueId,
        method_id: MethodId,
        dispatch: Dispatch,
        at: usize,
    ) -> EngineResult<()> {
        let class_id = match dispatch {
            Dispatch::Mono => engine
                .registry()
                .class(self.class_id)?
                .parent_id()
                .ok_or_else(|| EngineError::MethodNotFound {
                    method_id,
                    class_path: engine.registry().path_of(self.class_id).to_string(),
                })?,
            Dispatch::Poly => engine.class_of(target)?,
        };
        let caller = CallerInfo {
            class_id: self.class_id,
            method_id: self.method.id,
            this: self.this,
            line: engine.cur_line(),
            ip: at as u32,
        };
        engine.push_method_call(class_id, method_id, Some(caller))?;
        engine.invoke(target, class_id, method_id, dispatch)?;
        engine.pop_top()
    }

    fn enum_at(engine: &Engine, index: usize) -> EngineResult<(ClassId, u32, String)> {
        let value = engine.stack_value_at(index)?;
        let class_id = engine.class_of(value)?;
        let ordinal = engine.value_as::<EnumVal>(value)?.ordinal;
        let template = engine.registry().class(class_id)?.enum_item(ordinal)?.text.clone();
        Ok((class_id, ordinal, template))
    }

    fn step(&mut self, engine: &mut Engine) -> EngineResult<Flow> {
        let Some(op) = self.body.opcodes.get(self.ip).copied() else {
            return Ok(Flow::Return);
        };
        let at = self.ip;
        self.ip += 1;
        tracing::trace!(target: "cml::interp", ip = at, ?op, "op");

        match op {
            OpCode::NoOp => {}
            OpCode::CurLine(line) => engine.set_cur_line(line),

            // ================================================================
            // Pushes
            // ================================================================
            OpCode::PushLocal(local) => {
                let index = self.local_index(engine, local)?;
                engine.repush_at(index)?;
            }
            OpCode::PushParm(parm) => {
                let index = self.parm_index(engine, parm)?;
                engine.repush_at(index)?;
            }
            OpCode::PushMember(member) => {
                let value = self.member(engine, member)?;
                engine.push_value(value, StackItemType::Member)?;
            }
            OpCode::PushThis => {
                engine.push_value(self.this, StackItemType::This)?;
            }
            OpCode::PushException => {
                engine.push_exception()?;
            }
            OpCode::PushStrPoolItem(index) => {
                let text = self
                    .body
                    .strings
                    .get(usize::from(index))
                    .ok_or_else(|| EngineError::BadStringIndex {
                        index: usize::from(index),
                        method: self.method.name.clone(),
                    })?;
                let value = engine.string_pool_value(self.class_id, self.method.id, index, text)?;
                engine.push_value(value, StackItemType::StringPool)?;
            }
            OpCode::PushTempVar(class_id) => {
                engine.push_pool_value(class_id, Constness::NonConst)?;
            }
            OpCode::PushTempConst(class_id) => {
                engine.push_pool_value(class_id, Constness::Const)?;
            }
            OpCode::PushImBoolean(value) => {
                engine.push_boolean(value)?;
            }
            OpCode::PushImCard1(value) => {
                engine.push_card1(value)?;
            }
            OpCode::PushImCard2(value) => {
                engine.push_card2(value)?;
            }
            OpCode::PushImCard4(value) => {
                engine.push_card4(value)?;
            }
            OpCode::PushEnum { class_id, ordinal } => {
                engine.push_enum(class_id, ordinal)?;
            }
            OpCode::PushCurLine => {
                engine.push_card4(engine.cur_line())?;
            }

            // ================================================================
            // Pops
            // ================================================================
            OpCode::PopTop => engine.pop_top()?,
            OpCode::MultiPop(count) => engine.multi_pop(count as usize)?,
            OpCode::PopToReturn => {
                let ret = self
                    .first_parm
                    .checked_sub(1)
                    .filter(|_| self.method.has_return())
                    .ok_or(EngineError::BadStackIndex {
                        index: self.first_parm,
                        top: engine.stack_top(),
                    })?;
                let src = engine.stack_value_at(Self::from_top(engine, 1)?)?;
                let target = engine.stack_value_at(ret)?;
                engine.copy_value(target, src)?;
                engine.pop_top()?;
            }
            OpCode::Copy => {
                let src = engine.stack_value_at(Self::from_top(engine, 1)?)?;
                let target = engine.stack_value_at(Self::from_top(engine, 2)?)?;
                engine.copy_value(target, src)?;
                engine.multi_pop(2)?;
            }

            // ================================================================
            // Calls
            // ================================================================
            OpCode::CallLocal { local, method } => {
                let target = engine.stack_value_at(self.local_index(engine, local)?)?;
                self.call(engine, target, method, Dispatch::Poly, at)?;
            }
            OpCode::CallMember { member, method } => {
                let target = self.member(engine, member)?;
                self.call(engine, target, method, Dispatch::Poly, at)?;
            }
            OpCode::CallParm { parm, method } => {
                let target = engine.stack_value_at(self.parm_index(engine, parm)?)?;
                self.call(engine, target, method, Dispatch::Poly, at)?;
            }
            OpCode::CallStack { offset, method } => {
                let target = engine.stack_value_at(Self::from_top(engine, usize::from(offset))?)?;
                self.call(engine, target, method, Dispatch::Poly, at)?;
            }
            OpCode::CallThis(method) => self.call(engine, self.this, method, Dispatch::Poly, at)?,
            OpCode::CallParent(method) => self.call(engine, self.this, method, Dispatch::Mono, at)?,
            OpCode::CallExcept(method) => {
                let target = engine.thrown_value()?;
                self.call(engine, target, method, Dispatch::Poly, at)?;
            }

            // ================================================================
            // Control
            // ================================================================
            OpCode::ColIndex => {
                let index = engine.card4_at(Self::from_top(engine, 1)?)?;
                let col = engine.stack_value_at(Self::from_top(engine, 2)?)?;
                let elem = collections::elem_at(engine, col, index)?;
                engine.multi_pop(2)?;
                engine.push_value(elem, StackItemType::ColElem)?;
            }
            OpCode::Jump(target) => self.jump(target)?,
            OpCode::CondJump(target) | OpCode::NotCondJump(target) => {
                let cond = engine.bool_at(Self::from_top(engine, 1)?)?;
                engine.pop_top()?;
                if cond == matches!(op, OpCode::CondJump(_)) {
                    self.jump(target)?;
                }
            }
            OpCode::Try(catch_ip) => {
                if catch_ip as usize > self.body.opcodes.len() {
                    return Err(EngineError::BadIp {
                        ip: catch_ip as usize,
                        method: self.method.name.clone(),
                    });
                }
                engine.push_try(catch_ip)?;
            }
            OpCode::EndTry => engine.end_try()?,
            OpCode::Throw => {
                let (err_class, ordinal, text) = Self::enum_at(engine, Self::from_top(engine, 1)?)?;
                let src = engine.registry().path_of(self.class_id).to_string();
                return Err(engine.raise(err_class, &src, ordinal, text));
            }
            OpCode::ThrowFmt(count) => {
                let count = count as usize;
                let (err_class, ordinal, _) = Self::enum_at(engine, Self::from_top(engine, count + 1)?)?;
                let first = engine.stack_top().checked_sub(count).ok_or(EngineError::StackUnderflow)?;
                let mut tokens = Vec::with_capacity(count);
                for index in first..engine.stack_top() {
                    let value = engine.value(engine.stack_value_at(index)?)?;
                    tokens.push(value.data().format().unwrap_or_default());
                }
                let tokens: Vec<&dyn fmt::Display> = tokens.iter().map(|token| token as &dyn fmt::Display).collect();
                let src = engine.registry().path_of(self.class_id).to_string();
                return Err(engine.raise_fmt(err_class, &src, ordinal, &tokens));
            }
            OpCode::Rethrow => {
                let exc = engine.thrown_exception().cloned().ok_or(EngineError::NoException)?;
                return Err(EngineError::Thrown(Box::new(exc)));
            }
            OpCode::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassInfo, ClassRegistry, MethodExt, Visibility};
    use crate::intrinsics::{BooleanVal, Card4Val, StringVal};
    use crate::Intrinsic;

    const MEMBUF_ERRORS: &str = "MEng.System.Runtime.MemBuf.MemBufErrors";

    fn method_of(class: Intrinsic, name: &str) -> MethodId {
        let registry = ClassRegistry::builder().build().unwrap();
        registry.class(class.id()).unwrap().method_id(name).unwrap()
    }

    fn membuf_errors() -> ClassId {
        ClassRegistry::builder().build().unwrap().find(MEMBUF_ERRORS).unwrap()
    }

    fn method(name: &str, ret: Intrinsic) -> MethodInfo {
        MethodInfo::new(name, ret.id(), Visibility::Public, MethodExt::Final)
    }

    fn engine_with(path: &str, class: MacroClass) -> (Engine, ValueId) {
        let mut builder = ClassRegistry::builder();
        let id = builder
            .add_class(ClassInfo::from_path(path, "MEng.Object"), Box::new(class))
            .unwrap();
        let mut engine = Engine::new(builder.build().unwrap());
        let obj = engine.construct(id, "obj").unwrap();
        (engine, obj)
    }

    fn card4(engine: &Engine, id: ValueId) -> u32 {
        engine.value_as::<Card4Val>(id).unwrap().value
    }

    #[test]
    fn test_locals_parms_and_return() {
        let card4_id = Intrinsic::Card4.id();
        let body = OpMethodImpl::new(vec![
            // Acc = A
            OpCode::PushLocal(0),
            OpCode::PushParm(0),
            OpCode::Copy,
            // Acc.Add(B)
            OpCode::PushLocal(0),
            OpCode::PushTempVar(card4_id),
            OpCode::PushParm(1),
            OpCode::CallStack {
                offset: 3,
                method: method_of(Intrinsic::Card4, "Add"),
            },
            OpCode::MultiPop(3),
            OpCode::PushLocal(0),
            OpCode::PopToReturn,
            OpCode::Return,
        ])
        .with_local("Acc", card4_id, Constness::NonConst);
        let class = MacroClass::new().method(
            method("Sum", Intrinsic::Card4)
                .in_parm("A", card4_id)
                .in_parm("B", card4_id),
            body,
        );
        let (mut engine, obj) = engine_with("MEng.User.Adder", class);

        let a = engine.construct(card4_id, "a").unwrap();
        let b = engine.construct(card4_id, "b").unwrap();
        engine.value_as_mut::<Card4Val>(a).unwrap().value = 3;
        engine.value_as_mut::<Card4Val>(b).unwrap().value = 4;

        let before = engine.values().len();
        let ret = engine.call_by_name(obj, "Sum", &[a, b]).unwrap().unwrap();
        assert_eq!(card4(&engine, ret), 7);
        assert_eq!(card4(&engine, a), 3);
        assert_eq!(engine.stack_top(), 0);

        // The local is gone; the return value and pooled temp remain
        engine.free_value(ret).unwrap();
        assert_eq!(engine.values().len(), before + 1);
    }

    #[test]
    fn test_loop_with_cond_jump() {
        let card4_id = Intrinsic::Card4.id();
        let body = OpMethodImpl::new(vec![
            OpCode::PushTempVar(Intrinsic::Boolean.id()),
            OpCode::PushParm(0),
            OpCode::CallLocal {
                local: 0,
                method: method_of(Intrinsic::Card4, "Equal"),
            },
            OpCode::PopTop,
            OpCode::CondJump(9),
            OpCode::PushTempVar(card4_id),
            OpCode::CallLocal {
                local: 0,
                method: method_of(Intrinsic::Card4, "Inc"),
            },
            OpCode::PopTop,
            OpCode::Jump(0),
            OpCode::PushLocal(0),
            OpCode::PopToReturn,
        ])
        .with_local("I", card4_id, Constness::NonConst);
        let class = MacroClass::new().method(method("CountTo", Intrinsic::Card4).in_parm("Limit", card4_id), body);
        let (mut engine, obj) = engine_with("MEng.User.Counter", class);

        let limit = engine.construct(card4_id, "limit").unwrap();
        engine.value_as_mut::<Card4Val>(limit).unwrap().value = 5;
        let ret = engine.call_by_name(obj, "CountTo", &[limit]).unwrap().unwrap();
        assert_eq!(card4(&engine, ret), 5);
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn test_try_catches_throw() {
        let errors = membuf_errors();
        let body = OpMethodImpl::new(vec![
            OpCode::CurLine(40),
            OpCode::Try(5),
            OpCode::PushEnum {
                class_id: errors,
                ordinal: 0,
            },
            OpCode::Throw,
            OpCode::Return,
            OpCode::PushImBoolean(true),
            OpCode::PopToReturn,
        ]);
        let class = MacroClass::new().method(method("Guarded", Intrinsic::Boolean), body);
        let (mut engine, obj) = engine_with("MEng.User.Guard", class);

        let ret = engine.call_by_name(obj, "Guarded", &[]).unwrap().unwrap();
        assert!(engine.value_as::<BooleanVal>(ret).unwrap().value);
        assert_eq!(engine.stack_top(), 0);

        let exc = engine.thrown_exception().unwrap();
        assert_eq!(exc.error_name, "MemBufErrors.BadIndex");
        assert_eq!(exc.src_class_path, "MEng.User.Guard");
        assert_eq!(exc.line, 40);
    }

    #[test]
    fn test_uncaught_throw_unwinds_frame() {
        let body = OpMethodImpl::new(vec![
            OpCode::PushImCard4(1),
            OpCode::PushEnum {
                class_id: membuf_errors(),
                ordinal: 0,
            },
            OpCode::Throw,
        ])
        .with_local("Scratch", Intrinsic::String.id(), Constness::NonConst);
        let class = MacroClass::new().method(method("Fail", Intrinsic::Void), body);
        let (mut engine, obj) = engine_with("MEng.User.Fail", class);

        let err = engine.call_by_name(obj, "Fail", &[]).unwrap_err();
        assert!(err.is_catchable());
        assert_eq!(engine.stack_top(), 0);
        assert!(engine.thrown_exception().is_none());
    }

    #[test]
    fn test_throw_fmt_substitutes_tokens() {
        let body = OpMethodImpl::new(vec![
            OpCode::PushEnum {
                class_id: membuf_errors(),
                ordinal: 0,
            },
            OpCode::PushImCard4(20),
            OpCode::PushImCard4(16),
            OpCode::ThrowFmt(2),
        ]);
        let class = MacroClass::new().method(method("Fail", Intrinsic::Void), body);
        let (mut engine, obj) = engine_with("MEng.User.Fmt", class);

        let err = engine.call_by_name(obj, "Fail", &[]).unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.error_text, "Index 20 is beyond the buffer size of 16");
        assert_eq!(exc.src_class_path, "MEng.User.Fmt");
    }

    #[test]
    fn test_catch_then_rethrow() {
        let body = OpMethodImpl::new(vec![
            OpCode::Try(4),
            OpCode::PushEnum {
                class_id: membuf_errors(),
                ordinal: 0,
            },
            OpCode::Throw,
            OpCode::Return,
            OpCode::Rethrow,
        ]);
        let class = MacroClass::new().method(method("Fail", Intrinsic::Void), body);
        let (mut engine, obj) = engine_with("MEng.User.Rethrow", class);

        let err = engine.call_by_name(obj, "Fail", &[]).unwrap_err();
        assert_eq!(err.exception().unwrap().error_name, "MemBufErrors.BadIndex");
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn test_rethrow_without_exception() {
        let class = MacroClass::new().method(
            method("Fail", Intrinsic::Void),
            OpMethodImpl::new(vec![OpCode::Rethrow]),
        );
        let (mut engine, obj) = engine_with("MEng.User.NoExc", class);
        assert!(matches!(
            engine.call_by_name(obj, "Fail", &[]),
            Err(EngineError::NoException)
        ));
    }

    #[test]
    fn test_bad_jump() {
        let class = MacroClass::new().method(
            method("Lost", Intrinsic::Void),
            OpMethodImpl::new(vec![OpCode::Jump(99)]),
        );
        let (mut engine, obj) = engine_with("MEng.User.Lost", class);
        assert!(matches!(
            engine.call_by_name(obj, "Lost", &[]),
            Err(EngineError::BadIp { ip: 99, .. })
        ));
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn test_string_pool_item() {
        let body = OpMethodImpl::new(vec![OpCode::PushStrPoolItem(0), OpCode::PopToReturn]).with_string("hello");
        let class = MacroClass::new()
            .method(method("Greet", Intrinsic::String), body)
            .method(
                method("Broken", Intrinsic::String),
                OpMethodImpl::new(vec![OpCode::PushStrPoolItem(3)]),
            );
        let (mut engine, obj) = engine_with("MEng.User.Greeter", class);

        let ret = engine.call_by_name(obj, "Greet", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<StringVal>(ret).unwrap().text, "hello");
        assert!(matches!(
            engine.call_by_name(obj, "Broken", &[]),
            Err(EngineError::BadStringIndex { index: 3, .. })
        ));
    }

    #[test]
    fn test_member_and_col_index() {
        let class = MacroClass::new()
            .vector_type("Numbers", "MEng.Card4")
            .member("Items", "MEng.User.Bag.Numbers", Constness::NonConst)
            .method(
                method("Second", Intrinsic::Card4),
                OpMethodImpl::new(vec![
                    OpCode::PushMember(0),
                    OpCode::PushImCard4(1),
                    OpCode::ColIndex,
                    OpCode::PopToReturn,
                ]),
            )
            .method(
                method("Missing", Intrinsic::Card4),
                OpMethodImpl::new(vec![OpCode::PushMember(0), OpCode::PushImCard4(7), OpCode::ColIndex]),
            );
        let (mut engine, obj) = engine_with("MEng.User.Bag", class);

        let items = engine.value(obj).unwrap().member(0).unwrap();
        for value in [10, 20] {
            let elem = collections::add_new(&mut engine, items).unwrap();
            engine.value_as_mut::<Card4Val>(elem).unwrap().value = value;
        }

        let ret = engine.call_by_name(obj, "Second", &[]).unwrap().unwrap();
        assert_eq!(card4(&engine, ret), 20);

        let err = engine.call_by_name(obj, "Missing", &[]).unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.error_name, "CollectErrors.IndexErr");
        assert!(exc.error_text.contains('7'));
    }

    #[test]
    fn test_call_parent_from_override() {
        let card4_id = Intrinsic::Card4.id();
        let base = MacroClass::new().method(
            MethodInfo::new("Describe", card4_id, Visibility::Public, MethodExt::NonFinal),
            OpMethodImpl::new(vec![OpCode::PushImCard4(1), OpCode::PopToReturn]),
        );
        // Describe is the base's first method
        let derived = MacroClass::new().override_method(
            "Describe",
            OpMethodImpl::new(vec![
                OpCode::PushTempVar(card4_id),
                OpCode::CallParent(0),
                OpCode::PushTempVar(card4_id),
                OpCode::PushImCard4(10),
                OpCode::CallStack {
                    offset: 3,
                    method: method_of(Intrinsic::Card4, "Add"),
                },
                OpCode::MultiPop(2),
                OpCode::PopToReturn,
            ]),
        );

        let mut builder = ClassRegistry::builder();
        let base_id = builder
            .add_class(
                ClassInfo::from_path("MEng.User.Base", "MEng.Object").with_ext(crate::ClassExt::NonFinal),
                Box::new(base),
            )
            .unwrap();
        let derived_id = builder
            .add_class(ClassInfo::from_path("MEng.User.Derived", "MEng.User.Base"), Box::new(derived))
            .unwrap();
        let mut engine = Engine::new(builder.build().unwrap());

        let plain = engine.construct(base_id, "plain").unwrap();
        let ret = engine.call_by_name(plain, "Describe", &[]).unwrap().unwrap();
        assert_eq!(card4(&engine, ret), 1);

        let fancy = engine.construct(derived_id, "fancy").unwrap();
        let ret = engine.call_by_name(fancy, "Describe", &[]).unwrap().unwrap();
        assert_eq!(card4(&engine, ret), 11);
        assert_eq!(engine.stack_top(), 0);
    }
}
