use pretty_assertions::assert_eq;

use sis16_asm::{Assembler, AssemblerConfig, ErrorKind, SymbolEntry};

const HELLO: &str = r#"; prints a greeting through the console syscall
@define SYS_WRITE 1
@define STDOUT    1

@macro write &fd &buf &len {
    mov %bx, &fd
    mov %cx, &buf
    mov %dx, &len
    ssc #SYS_WRITE
    syscall
}

@org $0000
.data
msg:    .ascii "Hello World\n"
len:    .word 12

.text
start:  write #STDOUT #msg [len]
        ret
"#;

#[test]
fn hello_world_program() {
    let asm = Assembler::with_loader(AssemblerConfig::default(), sis16_asm::MemoryLoader::new())
        .assemble_source("hello.asm", HELLO)
        .unwrap();

    let mut want = b"Hello World\n".to_vec();
    want.extend([0x0C, 0x00]); // len
    want.extend([0x01, 0x01, 0x05, 0x01, 0x00]); // mov %bx, #1
    want.extend([0x01, 0x01, 0x06, 0x00, 0x00]); // mov %cx, #msg
    want.extend([0x01, 0x03, 0x07, 0x0C, 0x00]); // mov %dx, [len]
    want.extend([0x14, 0xF1, 0x01, 0x00]); // ssc #1
    want.extend([0x13, 0x12]); // syscall, ret

    assert_eq!(asm.image.base, 0);
    assert_eq!(asm.image.to_bytes(), want);
    assert_eq!(
        asm.symbols,
        vec![
            SymbolEntry { name: "msg".into(), address: 0 },
            SymbolEntry { name: "len".into(), address: 12 },
            SymbolEntry { name: "start".into(), address: 14 },
        ]
    );
}

#[test]
fn every_error_in_a_file_is_reported() {
    let src = ".text\nmov %al, #1\nfrob\nmov #1, %ax\npush\n";
    let err = sis16_asm::assemble(src).unwrap_err();
    assert_eq!(
        err.kinds(),
        vec![
            ErrorKind::Syntax,
            ErrorKind::UnknownMnemonic,
            ErrorKind::IllegalAddressingMode,
            ErrorKind::Syntax
        ]
    );
    let lines: Vec<u32> = err.iter().filter_map(|d| d.pos.as_ref().map(|p| p.line)).collect();
    assert_eq!(lines, vec![2, 3, 4, 5]);
}

#[test]
fn file_round_trip_through_fs_loader() {
    let dir = std::env::temp_dir().join(format!("sis16-smoke-{}", std::process::id()));
    std::fs::create_dir_all(dir.join("lib")).unwrap();
    let main = "@include \"lib/consts.asm\"\n.text\nmov %ax, #VALUE\n";
    std::fs::write(dir.join("main.asm"), main).unwrap();
    std::fs::write(dir.join("lib/consts.asm"), "@define VALUE $1234\n").unwrap();

    let asm = Assembler::new(AssemblerConfig::default())
        .assemble_file(&dir.join("main.asm"))
        .unwrap();
    assert_eq!(asm.image.to_bytes(), vec![0x01, 0x01, 0x04, 0x34, 0x12]);

    std::fs::remove_dir_all(&dir).unwrap();
}
