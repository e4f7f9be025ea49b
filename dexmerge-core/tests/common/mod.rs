//! Small dex assembler and inspection helpers shared by the integration tests
//!
//! [`DexBuilder`] produces well-formed, canonically sorted dex files from a
//! description of classes, which is all the merger expects of its inputs.

#![allow(dead_code)]

use dexmerge_core::hasher;
use dexmerge_core::parser::{ClassDef, CodeItem, ENDIAN_CONSTANT, HEADER_SIZE};
use dexmerge_core::DexFile;
use std::collections::{BTreeSet, HashMap};

pub const OBJECT: &str = "Ljava/lang/Object;";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub ty: String,
}

impl FieldRef {
    pub fn new(class: &str, name: &str, ty: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            ty: ty.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub ret: String,
    pub params: Vec<String>,
}

impl MethodRef {
    pub fn new(class: &str, name: &str, ret: &str, params: &[&str]) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            ret: ret.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Insn {
    ConstString(u8, String),
    ConstStringJumbo(u8, String),
    ConstClass(u8, String),
    NewInstance(u8, String),
    SgetObject(u8, FieldRef),
    InvokeDirect(MethodRef, Vec<u8>),
    InvokeStatic(MethodRef, Vec<u8>),
    ReturnVoid,
    Return(u8),
    Raw(Vec<u16>),
}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    String(String),
    Type(String),
    Null,
    Boolean(bool),
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub ret: String,
    pub params: Vec<String>,
    pub access_flags: u32,
    pub code: Option<Vec<Insn>>,
    /// Exception type and handler address of a try block covering the body
    pub catch: Option<(String, u32)>,
}

impl Method {
    pub fn new(name: &str, ret: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            ret: ret.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            access_flags: 0x0001,
            code: None,
            catch: None,
        }
    }

    pub fn code(mut self, code: Vec<Insn>) -> Self {
        self.code = Some(code);
        self
    }

    pub fn catching(mut self, exception: &str, handler_addr: u32) -> Self {
        self.catch = Some((exception.to_string(), handler_addr));
        self
    }

    pub fn flags(mut self, access_flags: u32) -> Self {
        self.access_flags = access_flags;
        self
    }

    fn reference(&self, class: &str) -> MethodRef {
        MethodRef {
            class: class.to_string(),
            name: self.name.clone(),
            ret: self.ret.clone(),
            params: self.params.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub descriptor: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub access_flags: u32,
    pub annotated: bool,
    pub static_fields: Vec<(String, String)>,
    pub instance_fields: Vec<(String, String)>,
    pub direct_methods: Vec<Method>,
    pub virtual_methods: Vec<Method>,
    pub static_values: Vec<Value>,
}

impl Class {
    pub fn new(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            superclass: Some(OBJECT.to_string()),
            interfaces: Vec::new(),
            source_file: None,
            access_flags: 0x0001,
            annotated: false,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
            static_values: Vec::new(),
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(superclass.to_string());
        self
    }

    pub fn root(mut self) -> Self {
        self.superclass = None;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn source(mut self, file: &str) -> Self {
        self.source_file = Some(file.to_string());
        self
    }

    pub fn access(mut self, access_flags: u32) -> Self {
        self.access_flags = access_flags;
        self
    }

    pub fn annotated(mut self) -> Self {
        self.annotated = true;
        self
    }

    pub fn static_field(mut self, name: &str, ty: &str) -> Self {
        self.static_fields.push((name.to_string(), ty.to_string()));
        self
    }

    pub fn instance_field(mut self, name: &str, ty: &str) -> Self {
        self.instance_fields.push((name.to_string(), ty.to_string()));
        self
    }

    pub fn direct(mut self, method: Method) -> Self {
        self.direct_methods.push(method);
        self
    }

    pub fn virtual_method(mut self, method: Method) -> Self {
        self.virtual_methods.push(method);
        self
    }

    pub fn static_values(mut self, values: Vec<Value>) -> Self {
        self.static_values = values;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DexBuilder {
    version: u32,
    classes: Vec<Class>,
    extra_strings: Vec<String>,
}

impl Default for DexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Every pool entry a file needs, before sorting
#[derive(Default)]
struct Pools {
    strings: BTreeSet<String>,
    types: BTreeSet<String>,
    protos: BTreeSet<(String, Vec<String>)>,
    fields: BTreeSet<FieldRef>,
    methods: BTreeSet<MethodRef>,
}

impl Pools {
    fn add_type(&mut self, ty: &str) {
        self.types.insert(ty.to_string());
        self.strings.insert(ty.to_string());
    }

    fn add_proto(&mut self, ret: &str, params: &[String]) {
        self.add_type(ret);
        for param in params {
            self.add_type(param);
        }
        self.strings.insert(shorty(ret, params));
        self.protos.insert((ret.to_string(), params.to_vec()));
    }

    fn add_field(&mut self, field: &FieldRef) {
        self.add_type(&field.class);
        self.add_type(&field.ty);
        self.strings.insert(field.name.clone());
        self.fields.insert(field.clone());
    }

    fn add_method(&mut self, method: &MethodRef) {
        self.add_type(&method.class);
        self.add_proto(&method.ret, &method.params);
        self.strings.insert(method.name.clone());
        self.methods.insert(method.clone());
    }

    fn add_insn(&mut self, insn: &Insn) {
        match insn {
            Insn::ConstString(_, s) | Insn::ConstStringJumbo(_, s) => {
                self.strings.insert(s.clone());
            }
            Insn::ConstClass(_, ty) | Insn::NewInstance(_, ty) => self.add_type(ty),
            Insn::SgetObject(_, field) => self.add_field(field),
            Insn::InvokeDirect(method, _) | Insn::InvokeStatic(method, _) => {
                self.add_method(method)
            }
            Insn::ReturnVoid | Insn::Return(_) | Insn::Raw(_) => {}
        }
    }

    fn add_value(&mut self, value: &Value) {
        match value {
            Value::String(s) => {
                self.strings.insert(s.clone());
            }
            Value::Type(ty) => self.add_type(ty),
            Value::Int(_) | Value::Null | Value::Boolean(_) => {}
        }
    }
}

/// Final index of every pool entry
struct Indices {
    strings: HashMap<String, u32>,
    types: HashMap<String, u32>,
    protos: HashMap<(String, Vec<String>), u32>,
    fields: HashMap<FieldRef, u32>,
    methods: HashMap<MethodRef, u32>,
}

impl Indices {
    fn string(&self, s: &str) -> u32 {
        self.strings[s]
    }

    fn ty(&self, ty: &str) -> u32 {
        self.types[ty]
    }

    fn type_list(&self, types: &[String]) -> Vec<u32> {
        types.iter().map(|t| self.ty(t)).collect()
    }
}

fn shorty_char(ty: &str) -> char {
    match ty.as_bytes()[0] {
        b'L' | b'[' => 'L',
        other => other as char,
    }
}

fn shorty(ret: &str, params: &[String]) -> String {
    std::iter::once(shorty_char(ret))
        .chain(params.iter().map(|p| shorty_char(p)))
        .collect()
}

fn utf16_key(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_uleb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn push_sleb(out: &mut Vec<u8>, mut value: i32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0) {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn align(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn push_mutf8(out: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        match unit {
            0x01..=0x7f => out.push(unit as u8),
            0x00 | 0x80..=0x7ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
}

fn push_index_value(out: &mut Vec<u8>, value_type: u8, index: u32) {
    let width = match index {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    out.push(((width as u8 - 1) << 5) | value_type);
    out.extend_from_slice(&index.to_le_bytes()[..width]);
}

fn encode_insn(insn: &Insn, idx: &Indices) -> Vec<u16> {
    let with_reg = |op: u16, reg: u8| op | (u16::from(reg) << 8);
    let invoke = |op: u16, method: &MethodRef, args: &[u8]| {
        assert!(args.len() <= 4, "at most four invoke arguments");
        let regs = args
            .iter()
            .enumerate()
            .fold(0u16, |acc, (i, &r)| acc | (u16::from(r & 0xf) << (4 * i)));
        let method_idx = idx.methods[method];
        vec![op | ((args.len() as u16) << 12), method_idx as u16, regs]
    };
    match insn {
        Insn::ConstString(reg, s) => {
            let string = idx.string(s);
            assert!(string <= 0xffff, "const-string operand must fit 16 bits");
            vec![with_reg(0x1a, *reg), string as u16]
        }
        Insn::ConstStringJumbo(reg, s) => {
            let string = idx.string(s);
            vec![with_reg(0x1b, *reg), string as u16, (string >> 16) as u16]
        }
        Insn::ConstClass(reg, ty) => vec![with_reg(0x1c, *reg), idx.ty(ty) as u16],
        Insn::NewInstance(reg, ty) => vec![with_reg(0x22, *reg), idx.ty(ty) as u16],
        Insn::SgetObject(reg, field) => vec![with_reg(0x62, *reg), idx.fields[field] as u16],
        Insn::InvokeDirect(method, args) => invoke(0x70, method, args),
        Insn::InvokeStatic(method, args) => invoke(0x71, method, args),
        Insn::ReturnVoid => vec![0x000e],
        Insn::Return(reg) => vec![with_reg(0x0f, *reg)],
        Insn::Raw(units) => units.clone(),
    }
}

impl DexBuilder {
    pub fn new() -> Self {
        Self {
            version: 35,
            classes: Vec::new(),
            extra_strings: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn class(mut self, class: Class) -> Self {
        self.classes.push(class);
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.extra_strings.push(s.to_string());
        self
    }

    pub fn strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_strings
            .extend(strings.into_iter().map(Into::into));
        self
    }

    fn collect(&self) -> Pools {
        let mut pools = Pools::default();
        for s in &self.extra_strings {
            pools.strings.insert(s.clone());
        }
        for class in &self.classes {
            let desc = &class.descriptor;
            pools.add_type(desc);
            if let Some(superclass) = &class.superclass {
                pools.add_type(superclass);
            }
            for interface in &class.interfaces {
                pools.add_type(interface);
            }
            if let Some(file) = &class.source_file {
                pools.strings.insert(file.clone());
            }
            for (name, ty) in class.static_fields.iter().chain(&class.instance_fields) {
                pools.add_field(&FieldRef::new(desc, name, ty));
            }
            for method in class.direct_methods.iter().chain(&class.virtual_methods) {
                pools.add_method(&method.reference(desc));
                for insn in method.code.iter().flatten() {
                    pools.add_insn(insn);
                }
                if let Some((exception, _)) = &method.catch {
                    pools.add_type(exception);
                }
            }
            for value in &class.static_values {
                pools.add_value(value);
            }
        }
        pools
    }

    /// Assemble the file, including a valid signature and checksum
    pub fn build(&self) -> Vec<u8> {
        let pools = self.collect();

        let mut strings: Vec<String> = pools.strings.into_iter().collect();
        strings.sort_by_key(|s| utf16_key(s));
        let string_idx: HashMap<String, u32> = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();

        let mut types: Vec<String> = pools.types.into_iter().collect();
        types.sort_by_key(|t| string_idx[t]);
        let type_idx: HashMap<String, u32> = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();

        let type_key = |list: &[String]| list.iter().map(|t| type_idx[t]).collect::<Vec<_>>();

        let mut protos: Vec<(String, Vec<String>)> = pools.protos.into_iter().collect();
        protos.sort_by_key(|(ret, params)| (type_idx[ret], type_key(params)));
        let proto_idx: HashMap<(String, Vec<String>), u32> = protos
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i as u32))
            .collect();

        let mut fields: Vec<FieldRef> = pools.fields.into_iter().collect();
        fields.sort_by_key(|f| (type_idx[&f.class], string_idx[&f.name], type_idx[&f.ty]));
        let field_idx: HashMap<FieldRef, u32> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i as u32))
            .collect();

        let mut methods: Vec<MethodRef> = pools.methods.into_iter().collect();
        methods.sort_by_key(|m| {
            (
                type_idx[&m.class],
                string_idx[&m.name],
                proto_idx[&(m.ret.clone(), m.params.clone())],
            )
        });
        let method_idx: HashMap<MethodRef, u32> = methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.clone(), i as u32))
            .collect();

        let idx = Indices {
            strings: string_idx,
            types: type_idx,
            protos: proto_idx,
            fields: field_idx,
            methods: method_idx,
        };

        let string_ids_off = HEADER_SIZE;
        let type_ids_off = string_ids_off + 4 * strings.len() as u32;
        let proto_ids_off = type_ids_off + 4 * types.len() as u32;
        let field_ids_off = proto_ids_off + 12 * protos.len() as u32;
        let method_ids_off = field_ids_off + 8 * fields.len() as u32;
        let class_defs_off = method_ids_off + 8 * methods.len() as u32;
        let data_off = class_defs_off + 32 * self.classes.len() as u32;

        let mut out = vec![0u8; data_off as usize];
        // (type code, count, offset) in file order
        let mut map: Vec<(u16, u32, u32)> = vec![(0x0000, 1, 0)];
        for (code, count, offset) in [
            (0x0001, strings.len(), string_ids_off),
            (0x0002, types.len(), type_ids_off),
            (0x0003, protos.len(), proto_ids_off),
            (0x0004, fields.len(), field_ids_off),
            (0x0005, methods.len(), method_ids_off),
            (0x0006, self.classes.len(), class_defs_off),
        ] {
            if count > 0 {
                map.push((code, count as u32, offset));
            }
        }

        // type lists
        let mut lists: BTreeSet<Vec<u32>> = BTreeSet::new();
        for (_, params) in &protos {
            lists.insert(idx.type_list(params));
        }
        for class in &self.classes {
            lists.insert(idx.type_list(&class.interfaces));
        }
        lists.remove(&Vec::<u32>::new());
        let mut list_offsets: HashMap<Vec<u32>, u32> = HashMap::new();
        list_offsets.insert(Vec::new(), 0);
        let mut first = None;
        for list in &lists {
            align(&mut out);
            first.get_or_insert(out.len() as u32);
            list_offsets.insert(list.clone(), out.len() as u32);
            push_u32(&mut out, list.len() as u32);
            for &ty in list {
                push_u16(&mut out, ty as u16);
            }
        }
        if let Some(offset) = first {
            map.push((0x1001, lists.len() as u32, offset));
        }

        // code items
        let mut code_offsets: HashMap<MethodRef, u32> = HashMap::new();
        let mut first = None;
        for class in &self.classes {
            for method in class.direct_methods.iter().chain(&class.virtual_methods) {
                let Some(code) = &method.code else { continue };
                align(&mut out);
                let offset = out.len() as u32;
                first.get_or_insert(offset);
                code_offsets.insert(method.reference(&class.descriptor), offset);

                let insns: Vec<u16> = code.iter().flat_map(|i| encode_insn(i, &idx)).collect();
                push_u16(&mut out, 4); // registers
                push_u16(&mut out, 0); // ins
                push_u16(&mut out, 4); // outs
                push_u16(&mut out, u16::from(method.catch.is_some()));
                push_u32(&mut out, 0); // debug info
                push_u32(&mut out, insns.len() as u32);
                for unit in &insns {
                    push_u16(&mut out, *unit);
                }
                if let Some((exception, addr)) = &method.catch {
                    if insns.len() % 2 == 1 {
                        push_u16(&mut out, 0);
                    }
                    push_u32(&mut out, 0);
                    push_u16(&mut out, insns.len() as u16);
                    push_u16(&mut out, 1);
                    push_uleb(&mut out, 1);
                    push_sleb(&mut out, 1);
                    push_uleb(&mut out, idx.ty(exception));
                    push_uleb(&mut out, *addr);
                }
            }
        }
        if let Some(offset) = first {
            map.push((0x2001, code_offsets.len() as u32, offset));
        }

        // class data
        let mut class_data_offsets: HashMap<usize, u32> = HashMap::new();
        for (i, class) in self.classes.iter().enumerate() {
            let empty = class.static_fields.is_empty()
                && class.instance_fields.is_empty()
                && class.direct_methods.is_empty()
                && class.virtual_methods.is_empty();
            if empty {
                continue;
            }
            class_data_offsets.insert(i, out.len() as u32);
            push_uleb(&mut out, class.static_fields.len() as u32);
            push_uleb(&mut out, class.instance_fields.len() as u32);
            push_uleb(&mut out, class.direct_methods.len() as u32);
            push_uleb(&mut out, class.virtual_methods.len() as u32);
            for list in [&class.static_fields, &class.instance_fields] {
                let mut entries: Vec<u32> = list
                    .iter()
                    .map(|(name, ty)| idx.fields[&FieldRef::new(&class.descriptor, name, ty)])
                    .collect();
                entries.sort_unstable();
                let mut previous = 0;
                for field in entries {
                    push_uleb(&mut out, field - previous);
                    push_uleb(&mut out, 0x0001);
                    previous = field;
                }
            }
            for list in [&class.direct_methods, &class.virtual_methods] {
                let mut entries: Vec<(u32, &Method)> = list
                    .iter()
                    .map(|m| (idx.methods[&m.reference(&class.descriptor)], m))
                    .collect();
                entries.sort_unstable_by_key(|(m, _)| *m);
                let mut previous = 0;
                for (method_idx, method) in entries {
                    push_uleb(&mut out, method_idx - previous);
                    push_uleb(&mut out, method.access_flags);
                    let code_off = code_offsets
                        .get(&method.reference(&class.descriptor))
                        .copied()
                        .unwrap_or(0);
                    push_uleb(&mut out, code_off);
                    previous = method_idx;
                }
            }
        }
        if let Some(&offset) = class_data_offsets.values().min() {
            map.push((0x2000, class_data_offsets.len() as u32, offset));
        }

        // string data
        let mut string_data_offsets = Vec::with_capacity(strings.len());
        for s in &strings {
            string_data_offsets.push(out.len() as u32);
            push_uleb(&mut out, s.encode_utf16().count() as u32);
            push_mutf8(&mut out, s);
            out.push(0);
        }
        if let Some(&offset) = string_data_offsets.first() {
            map.push((0x2002, strings.len() as u32, offset));
        }

        // static values
        let mut static_value_offsets: HashMap<usize, u32> = HashMap::new();
        for (i, class) in self.classes.iter().enumerate() {
            if class.static_values.is_empty() {
                continue;
            }
            static_value_offsets.insert(i, out.len() as u32);
            push_uleb(&mut out, class.static_values.len() as u32);
            for value in &class.static_values {
                match value {
                    Value::Int(v) => {
                        out.push((3 << 5) | 0x04);
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    Value::String(s) => push_index_value(&mut out, 0x17, idx.string(s)),
                    Value::Type(ty) => push_index_value(&mut out, 0x18, idx.ty(ty)),
                    Value::Null => out.push(0x1e),
                    Value::Boolean(b) => out.push((u8::from(*b) << 5) | 0x1f),
                }
            }
        }
        if let Some(&offset) = static_value_offsets.values().min() {
            map.push((0x2005, static_value_offsets.len() as u32, offset));
        }

        // empty annotation directories
        let mut annotation_offsets: HashMap<usize, u32> = HashMap::new();
        for (i, class) in self.classes.iter().enumerate() {
            if class.annotated {
                align(&mut out);
                annotation_offsets.insert(i, out.len() as u32);
                out.extend_from_slice(&[0u8; 16]);
            }
        }
        if let Some(&offset) = annotation_offsets.values().min() {
            map.push((0x2006, annotation_offsets.len() as u32, offset));
        }

        // map list
        align(&mut out);
        let map_off = out.len() as u32;
        map.push((0x1000, 1, map_off));
        push_u32(&mut out, map.len() as u32);
        for &(code, count, offset) in &map {
            push_u16(&mut out, code);
            push_u16(&mut out, 0);
            push_u32(&mut out, count);
            push_u32(&mut out, offset);
        }
        let file_size = out.len() as u32;

        // id tables
        let mut ids = Vec::with_capacity((data_off - HEADER_SIZE) as usize);
        for offset in &string_data_offsets {
            push_u32(&mut ids, *offset);
        }
        for ty in &types {
            push_u32(&mut ids, idx.string(ty));
        }
        for (ret, params) in &protos {
            push_u32(&mut ids, idx.string(&shorty(ret, params)));
            push_u32(&mut ids, idx.ty(ret));
            push_u32(&mut ids, list_offsets[&idx.type_list(params)]);
        }
        for field in &fields {
            push_u16(&mut ids, idx.ty(&field.class) as u16);
            push_u16(&mut ids, idx.ty(&field.ty) as u16);
            push_u32(&mut ids, idx.string(&field.name));
        }
        for method in &methods {
            push_u16(&mut ids, idx.ty(&method.class) as u16);
            push_u16(&mut ids, idx.protos[&(method.ret.clone(), method.params.clone())] as u16);
            push_u32(&mut ids, idx.string(&method.name));
        }
        for (i, class) in self.classes.iter().enumerate() {
            push_u32(&mut ids, idx.ty(&class.descriptor));
            push_u32(&mut ids, class.access_flags);
            push_u32(
                &mut ids,
                class.superclass.as_deref().map_or(u32::MAX, |s| idx.ty(s)),
            );
            push_u32(&mut ids, list_offsets[&idx.type_list(&class.interfaces)]);
            push_u32(
                &mut ids,
                class.source_file.as_deref().map_or(u32::MAX, |s| idx.string(s)),
            );
            push_u32(&mut ids, annotation_offsets.get(&i).copied().unwrap_or(0));
            push_u32(&mut ids, class_data_offsets.get(&i).copied().unwrap_or(0));
            push_u32(&mut ids, static_value_offsets.get(&i).copied().unwrap_or(0));
        }
        out[HEADER_SIZE as usize..data_off as usize].copy_from_slice(&ids);

        // header
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(format!("dex\n{:03}\0", self.version).as_bytes());
        push_u32(&mut header, 0);
        header.extend_from_slice(&[0u8; 20]);
        push_u32(&mut header, file_size);
        push_u32(&mut header, HEADER_SIZE);
        push_u32(&mut header, ENDIAN_CONSTANT);
        push_u32(&mut header, 0);
        push_u32(&mut header, 0);
        push_u32(&mut header, map_off);
        for (count, offset) in [
            (strings.len(), string_ids_off),
            (types.len(), type_ids_off),
            (protos.len(), proto_ids_off),
            (fields.len(), field_ids_off),
            (methods.len(), method_ids_off),
            (self.classes.len(), class_defs_off),
        ] {
            push_u32(&mut header, count as u32);
            push_u32(&mut header, if count == 0 { 0 } else { offset });
        }
        push_u32(&mut header, file_size - data_off);
        push_u32(&mut header, data_off);
        out[..HEADER_SIZE as usize].copy_from_slice(&header);

        hasher::write_integrity_fields(&mut out).unwrap();
        out
    }

    pub fn parse(&self) -> DexFile {
        DexFile::parse(self.build()).unwrap()
    }
}

/// All strings, in table order
pub fn strings(dex: &DexFile) -> Vec<String> {
    let count = dex.header().string_ids.0;
    (0..count).map(|i| dex.string(i).unwrap()).collect()
}

/// All type descriptors, in table order
pub fn type_descriptors(dex: &DexFile) -> Vec<String> {
    let count = dex.header().type_ids.0;
    (0..count).map(|i| dex.type_descriptor(i).unwrap()).collect()
}

/// Class descriptors in class_def order
pub fn class_names(dex: &DexFile) -> Vec<String> {
    dex.class_defs()
        .unwrap()
        .iter()
        .map(|def| dex.type_descriptor(def.class_idx).unwrap())
        .collect()
}

pub fn string_index(dex: &DexFile, s: &str) -> u32 {
    strings(dex)
        .iter()
        .position(|x| x == s)
        .unwrap_or_else(|| panic!("string {s:?} not in file")) as u32
}

pub fn find_class(dex: &DexFile, descriptor: &str) -> ClassDef {
    dex.class_defs()
        .unwrap()
        .into_iter()
        .find(|def| dex.type_descriptor(def.class_idx).unwrap() == descriptor)
        .unwrap_or_else(|| panic!("class {descriptor} not in file"))
}

/// Code item of the named method of a class
pub fn method_code(dex: &DexFile, class: &str, method: &str) -> CodeItem {
    let def = find_class(dex, class);
    let data = dex.class_data(def.class_data_off).unwrap();
    let entry = data
        .direct_methods
        .iter()
        .chain(&data.virtual_methods)
        .find(|m| {
            let id = dex.method_id(m.method_idx).unwrap();
            dex.string(id.name_idx).unwrap() == method
        })
        .unwrap_or_else(|| panic!("method {method} not in {class}"));
    dex.code_item(entry.code_off).unwrap()
}
