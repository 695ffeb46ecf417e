//! An embeddable interpreter for the Gonec scripting language.
//!
//! Source text is parsed by the host into the [`ast`] input contract, lowered
//! to register bytecode, and executed on a virtual machine with tagged
//! dynamic values, lexical environments, first-class closures, modules,
//! structured error handling, and cooperative tasks over channels. Native
//! types are exposed to scripts through the host object registration
//! protocol in [`HostTypeDef`].

pub mod ast;
mod binary;
mod bytecode;
mod env;
mod error;
mod io;
mod json;
mod lower;
mod names;
mod run;
mod sched;
mod types;
mod value;

pub use crate::{
    bytecode::{
        builder::CodeBuilder,
        inst::{Code, Inst, Label, Op, Reg},
    },
    env::Env,
    error::{ErrKind, GonecError, LowerError, LowerResult, RunResult, RuntimeError},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    names::{NameId, folded, intern, original},
    run::{compile, run, run_compiled},
    types::{
        chan::{TryRecv, VmChan},
        decimal::Decimal,
        func::{FromValue, FuncValue, NativeFunc, ScriptFunc, VmFunc, rets_to_value},
        map::VmMap,
        object::{HostData, HostTypeDef, TypeBuilder, VmObject},
        slice::VmSlice,
        time::{VmDuration, VmTime},
        waitgroup::VmWaitGroup,
    },
    value::{BinOp, TypeDef, TypeTag, UnOp, Value, VmModule, VmStr},
};

pub use crate::{binary::{BinTag, marshal, unmarshal}, json::{from_json_str, to_json_string}};
