//! Text dump of instruction trees.
//!
//! Expressions print on one line in prefix form (`stloc s(add(ldloc a, ldc.i4 1))`);
//! blocks and containers print one instruction per line with indentation.
//! The format is meant for diagnostics and tests, not for round-tripping.

use std::fmt::Write;

use crate::il::{
    BlockKind, CompoundEvaluation, ContainerKind, Function, InstrId, InstructionKind,
};
use crate::typesystem::Sign;

impl Function {
    /// Renders the subtree at `id` as text.
    #[must_use]
    pub fn to_text(&self, id: InstrId) -> String {
        let mut out = String::new();
        write_instruction(self, id, 0, &mut out);
        out
    }

    /// Renders the whole function.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = format!("function {} {{\n", self.name());
        for (_, variable) in self.variables() {
            let _ = writeln!(out, "  var {} : {}", variable.name, variable.ty);
        }
        out.push_str("  ");
        write_instruction(self, self.body(), 1, &mut out);
        out.push_str("\n}\n");
        out
    }
}

fn block_name(f: &Function, block: InstrId) -> String {
    match f.block_label(block) {
        Some(label) => format!("IL_{:04x}", label),
        None => format!("{:?}", block),
    }
}

fn container_name(f: &Function, container: InstrId) -> String {
    if container == f.body() {
        "body".to_string()
    } else {
        format!("BlockContainer{}", container.index())
    }
}

fn sign_suffix(sign: Sign) -> &'static str {
    match sign {
        Sign::None => "",
        Sign::Signed => ".signed",
        Sign::Unsigned => ".unsigned",
    }
}

fn newline(depth: usize, out: &mut String) {
    out.push('\n');
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_args(f: &Function, args: &[InstrId], depth: usize, out: &mut String) {
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_instruction(f, *arg, depth, out);
    }
    out.push(')');
}

fn write_instruction(f: &Function, id: InstrId, depth: usize, out: &mut String) {
    let kind = f.kind(id);
    match kind {
        InstructionKind::Nop | InstructionKind::LdNull => out.push_str(kind.opcode_name()),
        InstructionKind::LdcI4(v) => {
            let _ = write!(out, "ldc.i4 {}", v);
        }
        InstructionKind::LdcI8(v) => {
            let _ = write!(out, "ldc.i8 {}", v);
        }
        InstructionKind::LdcF(v) => {
            let _ = write!(out, "ldc.f {}", v);
        }
        InstructionKind::LdStr(s) => {
            let _ = write!(out, "ldstr {:?}", s);
        }
        InstructionKind::LdLoc(v) | InstructionKind::LdLoca(v) => {
            let _ = write!(out, "{} {}", kind.opcode_name(), f.variable(*v).name);
        }
        InstructionKind::StLoc { variable, value } => {
            let _ = write!(out, "stloc {}", f.variable(*variable).name);
            write_args(f, &[*value], depth, out);
        }
        InstructionKind::LdObj { target, ty } => {
            let _ = write!(out, "ldobj {}", ty);
            write_args(f, &[*target], depth, out);
        }
        InstructionKind::StObj { target, value, ty } => {
            let _ = write!(out, "stobj {}", ty);
            write_args(f, &[*target, *value], depth, out);
        }
        InstructionKind::LdFlda { target, field } => {
            let _ = write!(out, "ldflda {}", field.name);
            write_args(f, &[*target], depth, out);
        }
        InstructionKind::LdsFlda { field } => {
            let _ = write!(out, "ldsflda {}", field.name);
        }
        InstructionKind::LdElema { array, index, ty } => {
            let _ = write!(out, "ldelema {}", ty);
            write_args(f, &[*array, *index], depth, out);
        }
        InstructionKind::BinaryNumeric {
            op,
            left,
            right,
            check_overflow,
            sign,
        } => {
            let name: &'static str = op.into();
            out.push_str(name);
            if *check_overflow {
                out.push_str(".ovf");
            }
            out.push_str(sign_suffix(*sign));
            write_args(f, &[*left, *right], depth, out);
        }
        InstructionKind::Comp {
            kind: cmp,
            sign,
            left,
            right,
        } => {
            let name: &'static str = cmp.into();
            let _ = write!(out, "comp.{}{}", name, sign_suffix(*sign));
            write_args(f, &[*left, *right], depth, out);
        }
        InstructionKind::LogicNot(argument) => {
            out.push_str("logic.not");
            write_args(f, &[*argument], depth, out);
        }
        InstructionKind::Conv {
            argument,
            target,
            check_overflow,
            ..
        } => {
            let _ = write!(
                out,
                "conv.{}{}",
                target.keyword(),
                if *check_overflow { ".ovf" } else { "" }
            );
            write_args(f, &[*argument], depth, out);
        }
        InstructionKind::Call {
            method, arguments, ..
        } => {
            let _ = write!(out, "{} {}", kind.opcode_name(), method.name);
            write_args(f, arguments, depth, out);
        }
        InstructionKind::IsInst { argument, ty } | InstructionKind::UnboxAny { argument, ty } => {
            let _ = write!(out, "{} {}", kind.opcode_name(), ty);
            write_args(f, &[*argument], depth, out);
        }
        InstructionKind::CompoundAssignment {
            op,
            target,
            value,
            evaluates_to,
            ..
        } => {
            let name: &'static str = op.into();
            let when = match evaluates_to {
                CompoundEvaluation::OldValue => "old",
                CompoundEvaluation::NewValue => "new",
            };
            let _ = write!(out, "compound.{}.{}", name, when);
            write_args(f, &[*target, *value], depth, out);
        }
        InstructionKind::IfInstruction {
            condition,
            true_inst,
            false_inst,
        } => {
            out.push_str("if (");
            write_instruction(f, *condition, depth, out);
            out.push_str(") ");
            write_instruction(f, *true_inst, depth, out);
            if !matches!(f.kind(*false_inst), InstructionKind::Nop) {
                out.push_str(" else ");
                write_instruction(f, *false_inst, depth, out);
            }
        }
        InstructionKind::Branch { target } => {
            let _ = write!(out, "br {}", block_name(f, *target));
        }
        InstructionKind::Leave { target, value } => {
            let _ = write!(out, "leave {}", container_name(f, *target));
            if !matches!(f.kind(*value), InstructionKind::Nop) {
                write_args(f, &[*value], depth, out);
            }
        }
        InstructionKind::Throw(argument) => {
            out.push_str("throw");
            write_args(f, &[*argument], depth, out);
        }
        InstructionKind::Block {
            instructions,
            final_instruction,
            kind: block_kind,
            ..
        } => {
            out.push_str("Block ");
            if *block_kind == BlockKind::CallInlineAssign {
                out.push_str("(CallInlineAssign) ");
            }
            out.push_str(&block_name(f, id));
            let _ = write!(out, " (incoming: {}) {{", f.incoming_edge_count(id));
            for inst in instructions {
                newline(depth + 1, out);
                write_instruction(f, *inst, depth + 1, out);
            }
            if let Some(fin) = final_instruction {
                newline(depth + 1, out);
                out.push_str("final: ");
                write_instruction(f, *fin, depth + 1, out);
            }
            newline(depth, out);
            out.push('}');
        }
        InstructionKind::BlockContainer {
            blocks,
            kind: container_kind,
        } => {
            out.push_str(&container_name(f, id));
            if *container_kind == ContainerKind::Loop {
                out.push_str(" (while-true)");
            }
            out.push_str(" {");
            for block in blocks {
                newline(depth + 1, out);
                write_instruction(f, *block, depth + 1, out);
            }
            newline(depth, out);
            out.push('}');
        }
        InstructionKind::TryFinally {
            try_block,
            finally_block,
        } => {
            out.push_str(".try ");
            write_instruction(f, *try_block, depth, out);
            out.push_str(" finally ");
            write_instruction(f, *finally_block, depth, out);
        }
        InstructionKind::Using {
            variable,
            resource,
            body,
        } => {
            let _ = write!(out, "using ({} = ", f.variable(*variable).name);
            write_instruction(f, *resource, depth, out);
            out.push_str(") ");
            write_instruction(f, *body, depth, out);
        }
        InstructionKind::Switch { value, sections } => {
            out.push_str("switch (");
            write_instruction(f, *value, depth, out);
            out.push_str(") {");
            for section in sections {
                newline(depth + 1, out);
                write_instruction(f, *section, depth + 1, out);
            }
            newline(depth, out);
            out.push('}');
        }
        InstructionKind::SwitchSection { labels, body } => {
            let _ = write!(out, "case {:?}: ", labels);
            write_instruction(f, *body, depth, out);
        }
    }
}
