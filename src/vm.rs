use super::{
    chunk::{Chunk, Instruction},
    compiler::Compiler,
    debug::debug_bytecode,
    reporter::{At, Phase, Report, Reporter},
    table::Table,
    value::{Function, Heap, ObjString, Value},
};
use std::{convert::TryFrom, fmt, io::Write, rc::Rc};

pub const FRAMES_MAX: usize = 64;

#[derive(Debug, PartialEq)]
pub enum InterpretError {
    Compile,
    Runtime,
}

pub struct Frame {
    function: Rc<Function>,
    ip: usize,
    // base of this invocation's slice of the value stack; slot 0 holds
    // the callee itself
    slots: usize,
}

impl Frame {
    fn new(function: Rc<Function>, slots: usize) -> Self {
        Frame {
            function,
            ip: 0,
            slots,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function: {}, slots: {}", self.function, self.slots)
    }
}

pub struct Vm<'w> {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Table,
    heap: Heap,
    out: &'w mut dyn Write,
}

impl<'w> Vm<'w> {
    pub fn new(out: &'w mut dyn Write) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            heap: Heap::new(),
            out,
        }
    }

    pub fn interpret(
        &mut self,
        source: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<(), InterpretError> {
        let function = Compiler::new(source, &mut self.heap, reporter)
            .compile()
            .map_err(|_| InterpretError::Compile)?;
        debug_bytecode(&function);

        let function = Rc::new(function);
        self.stack.push(Value::Function(Rc::clone(&function)));
        self.frames.push(Frame::new(function, 0));

        self.run(reporter).map_err(|_| InterpretError::Runtime)
    }

    //>> Error reporting
    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    fn error(&mut self, msg: &str, reporter: &mut dyn Reporter) {
        let line = self.get_cur_chunk().get_line(self.get_ip());
        reporter.error(Report::new(Phase::Runtime, msg.to_string(), line, At::None));
        self.reset_stack();
    }
    //<<

    //>> Stack manipulation
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap()
    }

    fn last(&self) -> Value {
        self.stack.last().unwrap().clone()
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance].clone()
    }

    fn get(&self, idx: usize) -> Value {
        self.stack[idx].clone()
    }
    //<<

    //>> Frame manipulation
    fn last_frame(&self) -> &Frame {
        self.frames.last().unwrap()
    }

    fn last_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn get_cur_chunk(&self) -> &Chunk {
        self.last_frame().function.chunk()
    }

    fn get_ip(&self) -> usize {
        self.last_frame().ip
    }

    fn get_slots_start(&self) -> usize {
        self.last_frame().slots
    }

    fn get_byte(&self, offset: usize) -> Option<u8> {
        self.get_cur_chunk().get_byte(offset)
    }

    fn get_constant(&self, idx: usize) -> Value {
        self.get_cur_chunk().get_constant(idx)
    }

    fn read_byte_oper(&self) -> u8 {
        self.get_byte(self.get_ip() + 1).unwrap()
    }

    // big-endian, matching the compiler's jump operands
    fn read_bytes_oper(&self) -> u16 {
        let hi = self.get_byte(self.get_ip() + 1).unwrap();
        let lo = self.get_byte(self.get_ip() + 2).unwrap();
        (hi as u16) << 8 | lo as u16
    }

    fn read_string_oper(&self) -> Rc<ObjString> {
        match self.get_constant(self.read_byte_oper() as usize) {
            Value::String(name) => name,
            _ => unreachable!(),
        }
    }
    //<<

    fn call(&mut self, argc: usize, reporter: &mut dyn Reporter) -> Result<(), ()> {
        match self.peek(argc) {
            Value::Function(function) => {
                if argc != function.arity() as usize {
                    self.error(
                        &format!(
                            "Expected {} arguments but got {}.",
                            function.arity(),
                            argc
                        ),
                        reporter,
                    );
                    return Err(());
                }
                if self.frames.len() == FRAMES_MAX {
                    self.error("Stack overflow.", reporter);
                    return Err(());
                }

                // the caller resumes after the two call bytes
                self.last_frame_mut().ip += 2;

                let frame = Frame::new(function, self.stack.len() - argc - 1);
                if cfg!(feature = "debug-execution") {
                    println!("[DEBUG] called {:?}", frame);
                }
                self.frames.push(frame);
                Ok(())
            }
            _ => {
                self.error("Can only call functions.", reporter);
                Err(())
            }
        }
    }

    /// Executes one instruction and returns how far `ip` advances.
    /// Jumps fold their displacement into the size; `Loop`, `Call` and
    /// `Return` adjust the frame themselves and return 0.
    fn execute_instr(
        &mut self,
        instr: Instruction,
        reporter: &mut dyn Reporter,
    ) -> Result<usize, ()> {
        match instr {
            Instruction::Constant => {
                let idx = self.read_byte_oper() as usize;
                self.push(self.get_constant(idx));
                return Ok(2);
            }
            Instruction::Nil => self.push(Value::Nil),
            Instruction::True => self.push(Value::Bool(true)),
            Instruction::False => self.push(Value::Bool(false)),
            Instruction::Pop => {
                self.pop();
            }
            Instruction::GetLocal => {
                let idx = self.get_slots_start() + self.read_byte_oper() as usize;
                self.push(self.get(idx));
                return Ok(2);
            }
            Instruction::SetLocal => {
                let idx = self.get_slots_start() + self.read_byte_oper() as usize;
                let value = self.last();
                self.stack[idx] = value;
                return Ok(2);
            }
            Instruction::GetGlobal => {
                let name = self.read_string_oper();
                match self.globals.get(&name) {
                    Some(value) => self.push(value),
                    None => {
                        self.error(&format!("Undefined variable: '{}'.", name), reporter);
                        return Err(());
                    }
                }
                return Ok(2);
            }
            Instruction::DefineGlobal => {
                let name = self.read_string_oper();
                let value = self.last();
                self.globals.set(name, value);
                self.pop();
                return Ok(2);
            }
            Instruction::SetGlobal => {
                let name = self.read_string_oper();
                let value = self.last();
                if self.globals.set(Rc::clone(&name), value) {
                    // a set must not create the variable
                    self.globals.delete(&name);
                    self.error(&format!("Undefined variable: '{}'.", name), reporter);
                    return Err(());
                }
                return Ok(2);
            }
            Instruction::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a == b));
            }
            Instruction::Greater => {
                let b = self.pop();
                let a = self.pop();
                if !Value::are_numbers(&a, &b) {
                    self.error("Operands must be numbers.", reporter);
                    return Err(());
                }
                self.push(Value::Bool(a > b));
            }
            Instruction::Less => {
                let b = self.pop();
                let a = self.pop();
                if !Value::are_numbers(&a, &b) {
                    self.error("Operands must be numbers.", reporter);
                    return Err(());
                }
                self.push(Value::Bool(a < b));
            }
            Instruction::Add => {
                let b = self.pop();
                let a = self.pop();
                match (&a, &b) {
                    (Value::Number(a), Value::Number(b)) => {
                        let sum = a + b;
                        self.push(Value::Number(sum));
                    }
                    (Value::String(a), Value::String(b)) => {
                        let string = self.heap.intern(&format!("{}{}", a, b));
                        self.push(Value::String(string));
                    }
                    _ => {
                        self.error("Operands must be two numbers or two strings.", reporter);
                        return Err(());
                    }
                }
            }
            Instruction::Subtract => {
                let b = self.pop();
                let a = self.pop();
                if !Value::are_numbers(&a, &b) {
                    self.error("Operands must be numbers.", reporter);
                    return Err(());
                }
                self.push(a - b);
            }
            Instruction::Multiply => {
                let b = self.pop();
                let a = self.pop();
                if !Value::are_numbers(&a, &b) {
                    self.error("Operands must be numbers.", reporter);
                    return Err(());
                }
                self.push(a * b);
            }
            Instruction::Divide => {
                let b = self.pop();
                let a = self.pop();
                if !Value::are_numbers(&a, &b) {
                    self.error("Operands must be numbers.", reporter);
                    return Err(());
                }
                self.push(a / b);
            }
            Instruction::Not => {
                let popped = self.pop();
                self.push(!popped);
            }
            Instruction::Negate => {
                if !self.last().is_number() {
                    self.error("Operand must be a number.", reporter);
                    return Err(());
                }
                let popped = self.pop();
                self.push(-popped);
            }
            Instruction::Print => {
                let value = self.pop();
                writeln!(self.out, "{}", value).ok();
            }
            Instruction::Jump => {
                return Ok(3 + self.read_bytes_oper() as usize);
            }
            Instruction::JumpIfFalse => {
                // the condition stays on the stack; the compiler pops it
                // on both branches
                if self.last().is_truthy() {
                    return Ok(3);
                }
                return Ok(3 + self.read_bytes_oper() as usize);
            }
            Instruction::Loop => {
                let offset = self.read_bytes_oper() as usize;
                let frame = self.last_frame_mut();
                frame.ip = frame.ip + 3 - offset;
                return Ok(0);
            }
            Instruction::Call => {
                let argc = self.read_byte_oper() as usize;
                self.call(argc, reporter)?;
                return Ok(0);
            }
            Instruction::Return => {
                let returned = self.pop();
                let frame = self.frames.pop().unwrap();

                if cfg!(feature = "debug-execution") {
                    println!("[DEBUG] returned from {:?}", frame);
                }

                if self.frames.is_empty() {
                    // pop the script function itself
                    self.pop();
                    return Ok(0);
                }

                self.stack.truncate(frame.slots);
                self.push(returned);
                return Ok(0);
            }
        };
        Ok(1)
    }

    fn run(&mut self, reporter: &mut dyn Reporter) -> Result<(), ()> {
        while !self.frames.is_empty() {
            let instr = match self.get_byte(self.get_ip()) {
                Some(byte) => Instruction::try_from(byte).unwrap(),
                None => break,
            };

            if cfg!(feature = "debug-execution") {
                let mut buffer = String::from("          ");
                for value in self.stack.iter() {
                    buffer += &format!("[ {} ]", value);
                }
                println!("{}", buffer);
                print!(
                    "{}",
                    self.get_cur_chunk()
                        .disassemble_instr_at(self.get_ip(), false)
                        .0
                );
            }

            let size = self.execute_instr(instr, reporter)?;
            if let Some(frame) = self.frames.last_mut() {
                frame.ip += size;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ErrorsTracker {
        errors: Vec<Report>,
    }

    impl ErrorsTracker {
        fn new() -> Self {
            ErrorsTracker { errors: Vec::new() }
        }
    }

    impl Reporter for ErrorsTracker {
        fn error(&mut self, report: Report) {
            self.errors.push(report);
        }
    }

    fn run(source: &str) -> (Result<(), InterpretError>, String, Vec<Report>) {
        let mut out = Vec::new();
        let mut tracker = ErrorsTracker::new();
        let result = Vm::new(&mut out).interpret(source, &mut tracker);
        (result, String::from_utf8(out).unwrap(), tracker.errors)
    }

    #[test]
    fn arity_is_checked() {
        let (result, _, errors) = run("fun greet(name) { print name; } greet();");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert_eq!(errors[0].msg, "Expected 1 arguments but got 0.");
        assert_eq!(errors[0].phase, Phase::Runtime);
    }

    #[test]
    fn only_functions_are_callable() {
        let (result, _, errors) = run("var a = 1; a();");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert_eq!(errors[0].msg, "Can only call functions.");
    }

    #[test]
    fn runaway_recursion_overflows() {
        let (result, _, errors) = run("fun f() { f(); } f();");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert_eq!(errors[0].msg, "Stack overflow.");
    }

    #[test]
    fn set_global_requires_definition() {
        let (result, _, errors) = run("a = 1;");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert_eq!(errors[0].msg, "Undefined variable: 'a'.");
    }

    #[test]
    fn globals_survive_across_interpret_calls() {
        let mut out = Vec::new();
        let mut tracker = ErrorsTracker::new();
        let mut vm = Vm::new(&mut out);
        assert!(vm.interpret("var a = 40;", &mut tracker).is_ok());
        assert!(vm.interpret("print a + 2;", &mut tracker).is_ok());
        drop(vm);
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
    }

    #[test]
    fn stacks_reset_after_runtime_error() {
        let mut out = Vec::new();
        let mut tracker = ErrorsTracker::new();
        let mut vm = Vm::new(&mut out);
        assert_eq!(
            vm.interpret("print 1 + nil;", &mut tracker),
            Err(InterpretError::Runtime)
        );
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        // and the vm keeps working
        assert!(vm.interpret("print 1 + 2;", &mut tracker).is_ok());
        drop(vm);
        assert_eq!(String::from_utf8(out).unwrap(), "3\n");
    }

    #[test]
    fn runtime_error_reports_the_line() {
        let (_, _, errors) = run("var a = 1;\nvar b = nil;\na + b;");
        assert_eq!(errors[0].line, 3);
    }
}
