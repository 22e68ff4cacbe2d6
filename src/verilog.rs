//! SystemVerilog emission for one BAR replay controller.
//!
//! The module skeleton is fixed: a port list shared with the surrounding BAR
//! plumbing, one counter and one lookup table per recorded word, a reset block
//! that loads the tables, and a per-cycle dispatcher that translates the
//! staged read address against the base address register and selects a word.

use std::fmt::Write;

use crate::{
    error::GenerateError,
    replay::{RegionReplay, WordTable},
};

const PORT_LIST: &str = "    input               rst,
    input               clk,
    // incoming BAR writes:
    input [31:0]        wr_addr,
    input [3:0]         wr_be,
    input [31:0]        wr_data,
    input               wr_valid,
    // incoming BAR reads:
    input  [87:0]       rd_req_ctx,
    input  [31:0]       rd_req_addr,
    input               rd_req_valid,
    input  [31:0]       base_address_register,
    // outgoing BAR read replies:
    output reg [87:0]   rd_rsp_ctx,
    output reg [31:0]   rd_rsp_data,
    output reg          rd_rsp_valid
);

    bit [87:0]      drd_req_ctx;
    bit [31:0]      drd_req_addr;
    bit             drd_req_valid;

    bit [31:0]      dwr_addr;
    bit [31:0]      dwr_data;
    bit             dwr_valid;

";

const RESET_OPEN: &str = "
    always @ (posedge clk) begin
        if (rst) begin
            rd_rsp_valid <= 1'b0;

";

// Bit 2 of the base register is forced low before the subtraction; the PCIe
// bridge reports BARs with that bit set.
const DISPATCH_OPEN: &str = "
        end else begin
            drd_req_ctx     <= rd_req_ctx;
            drd_req_valid   <= rd_req_valid;
            dwr_valid       <= wr_valid;
            drd_req_addr    <= rd_req_addr;
            rd_rsp_ctx      <= drd_req_ctx;
            rd_rsp_valid    <= drd_req_valid;
            dwr_addr        <= wr_addr;
            dwr_data        <= wr_data;

            if (drd_req_valid) begin
                case (({drd_req_addr[31:24], drd_req_addr[23:16], drd_req_addr[15:08], drd_req_addr[07:00]} - (base_address_register & ~32'h4)) & 32'hFFFF)
";

const DISPATCH_CLOSE: &str = "                    default: rd_rsp_data <= 32'h00000000;
                endcase
            end else if (dwr_valid) begin
                // writes are latched but never replayed
            end else begin
                rd_rsp_data <= 32'h00000000;
            end
        end
    end
endmodule
";

pub fn render_module(name: &str, replay: &RegionReplay) -> Result<String, GenerateError> {
    if !is_identifier(name) {
        return Err(GenerateError::Template(format!(
            "module name {name:?} is not a legal SystemVerilog identifier"
        )));
    }

    let mut out = String::new();
    writeln!(out, "module {name}(")?;
    out.push_str(PORT_LIST);
    for word in replay.words() {
        write_declarations(&mut out, word)?;
    }
    out.push_str(RESET_OPEN);
    for word in replay.words() {
        write_initializers(&mut out, word)?;
    }
    out.push_str(DISPATCH_OPEN);
    for word in replay.words() {
        write_case_arm(&mut out, word)?;
    }
    out.push_str(DISPATCH_CLOSE);
    Ok(out)
}

fn write_declarations(out: &mut String, word: &WordTable) -> std::fmt::Result {
    let addr = word.address();
    writeln!(out, "    bit [{}:0] R_C_{addr:04x};", word.counter_width() - 1)?;
    writeln!(out, "    bit [31:0] R_{addr:04x} [0:{}];", word.last_index())?;
    writeln!(out)
}

fn write_initializers(out: &mut String, word: &WordTable) -> std::fmt::Result {
    let addr = word.address();
    writeln!(out, "            R_C_{addr:04x} <= '0;")?;
    for (idx, entry) in word.entries().iter().enumerate() {
        writeln!(
            out,
            "            R_{addr:04x}[{idx}] <= 32'h{:08x}; {}",
            entry.value, entry.annotation
        )?;
    }
    writeln!(out)
}

fn write_case_arm(out: &mut String, word: &WordTable) -> std::fmt::Result {
    let addr = word.address();
    writeln!(out, "                    32'h{addr:04x}: begin")?;
    writeln!(out, "                        rd_rsp_data <= R_{addr:04x}[R_C_{addr:04x}];")?;
    writeln!(
        out,
        "                        R_C_{addr:04x} <= (R_C_{addr:04x} == {}) ? '0 : R_C_{addr:04x} + 1;",
        word.last_index()
    )?;
    writeln!(out, "                    end")
}

// IEEE 1800-2017 Annex B.
const RESERVED_WORDS: &[&str] = &[
    "accept_on", "alias", "always", "always_comb", "always_ff", "always_latch", "and", "assert",
    "assign", "assume", "automatic", "before", "begin", "bind", "bins", "binsof", "bit", "break",
    "buf", "bufif0", "bufif1", "byte", "case", "casex", "casez", "cell", "chandle", "checker",
    "class", "clocking", "cmos", "config", "const", "constraint", "context", "continue", "cover",
    "covergroup", "coverpoint", "cross", "deassign", "default", "defparam", "design", "disable",
    "dist", "do", "edge", "else", "end", "endcase", "endchecker", "endclass", "endclocking",
    "endconfig", "endfunction", "endgenerate", "endgroup", "endinterface", "endmodule",
    "endpackage", "endprimitive", "endprogram", "endproperty", "endspecify", "endsequence",
    "endtable", "endtask", "enum", "event", "eventually", "expect", "export", "extends", "extern",
    "final", "first_match", "for", "force", "foreach", "forever", "fork", "forkjoin", "function",
    "generate", "genvar", "global", "highz0", "highz1", "if", "iff", "ifnone", "ignore_bins",
    "illegal_bins", "implements", "implies", "import", "incdir", "include", "initial", "inout",
    "input", "inside", "instance", "int", "integer", "interconnect", "interface", "intersect",
    "join", "join_any", "join_none", "large", "let", "liblist", "library", "local", "localparam",
    "logic", "longint", "macromodule", "matches", "medium", "modport", "module", "nand",
    "negedge", "nettype", "new", "nexttime", "nmos", "nor", "noshowcancelled", "not", "notif0",
    "notif1", "null", "or", "output", "package", "packed", "parameter", "pmos", "posedge",
    "primitive", "priority", "program", "property", "protected", "pull0", "pull1", "pulldown",
    "pullup", "pulsestyle_ondetect", "pulsestyle_onevent", "pure", "rand", "randc", "randcase",
    "randsequence", "rcmos", "real", "realtime", "ref", "reg", "reject_on", "release", "repeat",
    "restrict", "return", "rnmos", "rpmos", "rtran", "rtranif0", "rtranif1", "s_always",
    "s_eventually", "s_nexttime", "s_until", "s_until_with", "scalared", "sequence", "shortint",
    "shortreal", "showcancelled", "signed", "small", "soft", "solve", "specify", "specparam",
    "static", "string", "strong", "strong0", "strong1", "struct", "super", "supply0", "supply1",
    "sync_accept_on", "sync_reject_on", "table", "tagged", "task", "this", "throughout", "time",
    "timeprecision", "timeunit", "tran", "tranif0", "tranif1", "tri", "tri0", "tri1", "triand",
    "trior", "trireg", "type", "typedef", "union", "unique", "unique0", "unsigned", "until",
    "until_with", "untyped", "use", "uwire", "var", "vectored", "virtual", "void", "wait",
    "wait_order", "wand", "weak", "weak0", "weak1", "while", "wildcard", "wire", "with", "within",
    "wor", "xnor", "xor",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED_WORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{replay::SizePolicy, trace::Operation};

    fn region_with(ops: &[(u32, u32, u32)]) -> RegionReplay {
        let ops: Vec<Operation> = ops
            .iter()
            .enumerate()
            .map(|(idx, &(address, size, value))| Operation {
                sequence_index: idx + 1,
                region: 0,
                address,
                size,
                value,
            })
            .collect();
        RegionReplay::build(0, &ops, SizePolicy::ZeroFill).unwrap()
    }

    #[test]
    fn renders_tables_and_dispatch_for_each_word() {
        let replay = region_with(&[(0x1000, 4, 0xdead_beef), (0x1000, 4, 0xcafe_babe), (0x8, 4, 1)]);
        let text = render_module("bar_ctrl0", &replay).unwrap();

        assert!(text.starts_with("module bar_ctrl0(\n    input               rst,\n"));
        assert!(text.ends_with("endmodule\n"));
        assert!(text.contains("    bit [0:0] R_C_1000;\n    bit [31:0] R_1000 [0:1];\n"));
        assert!(text.contains(
            "            R_1000[0] <= 32'hdeadbeef; // bar0 4b read from 0x1000 = 0xdeadbeef\n"
        ));
        assert!(text.contains(
            "            R_1000[1] <= 32'hcafebabe; // bar0 4b read from 0x1000 = 0xcafebabe\n"
        ));
        assert!(text.contains("R_C_1000 <= (R_C_1000 == 1) ? '0 : R_C_1000 + 1;"));
        assert!(text.contains("R_C_0008 <= (R_C_0008 == 0) ? '0 : R_C_0008 + 1;"));
        assert!(text.contains("(base_address_register & ~32'h4)) & 32'hFFFF)"));

        // Lower word addresses are declared and dispatched first.
        let low = text.find("32'h0008: begin").unwrap();
        let high = text.find("32'h1000: begin").unwrap();
        assert!(low < high);
        assert!(text.find("default: rd_rsp_data").unwrap() > high);
    }

    #[test]
    fn empty_region_still_has_a_default_arm() {
        let replay = region_with(&[]);
        let text = render_module("empty", &replay).unwrap();
        assert!(!text.contains("R_C_"));
        assert!(text.contains("default: rd_rsp_data <= 32'h00000000;"));
    }

    #[test]
    fn rejects_module_names_that_are_not_identifiers() {
        let replay = region_with(&[(0, 4, 0)]);
        for name in ["", "0bar", "bar-ctrl", "bar ctrl", "module", "begin", "tri0"] {
            let err = render_module(name, &replay).unwrap_err();
            assert!(matches!(err, GenerateError::Template(_)), "{name:?}");
        }
    }
}
