//! Probe payloads executed with `python -c`.

use crate::domain::smoke::SmokeCheck;

/// `argv[1]` is `cuda` or `cpu`; prints the runtime version on success.
pub const PRIMARY_RUNTIME: &str = r#"
import sys
import torch
device = sys.argv[1]
if device == "cuda" and not torch.cuda.is_available():
    raise SystemExit("accelerator not available to torch")
x = torch.randn(64, 64, device=device)
float((x @ x).sum().item())
print(torch.__version__)
"#;

/// Prints `1` when an accelerator is usable, `0` otherwise.
pub const DEVICE_AVAILABLE: &str = r#"
import torch
print("1" if torch.cuda.is_available() else "0")
"#;

/// `argv[1]` is the module name; runs its attention kernel when possible.
pub const SECONDARY_MODULE: &str = r#"
import importlib
import sys
import torch
module = importlib.import_module(sys.argv[1])
ops = getattr(module, "ops", None)
if ops is not None and torch.cuda.is_available():
    q = torch.randn(1, 16, 4, 32, device="cuda", dtype=torch.float16)
    ops.memory_efficient_attention(q, q, q)
print(getattr(module, "__version__", "unknown"))
"#;

/// Shared prologue for smoke checks: `emit` prints one JSON result and exits.
/// `argv[2]` names the secondary module.
const SMOKE_PRELUDE: &str = r#"
import json
import sys
NAME = sys.argv[1]
MODULE = sys.argv[2] if len(sys.argv) > 2 else ""
def emit(status, **details):
    print(json.dumps({"name": NAME, "status": status, "details": details}, default=str))
    sys.exit(0)
try:
    import torch
except Exception as e:
    emit("FAIL", error=str(e))
"#;

const SMOKE_RUNTIME_BASIC: &str = r#"
try:
    info = {"torch_version": torch.__version__, "cuda_available": torch.cuda.is_available()}
    device = "cuda" if torch.cuda.is_available() else "cpu"
    a = torch.randn(256, 256, device=device)
    b = torch.randn(256, 256, device=device)
    info["matmul_sum"] = float((a @ b).sum().item())
    if device == "cuda":
        info["cuda_version"] = torch.version.cuda
        info["device_count"] = torch.cuda.device_count()
        info["device_name"] = torch.cuda.get_device_name(0)
    emit("PASS", **info)
except Exception as e:
    emit("FAIL", error=str(e))
"#;

const SMOKE_SECONDARY_MODULE: &str = r#"
import importlib
try:
    module = importlib.import_module(MODULE)
    importlib.import_module(MODULE + ".ops")
except ImportError as e:
    emit("SKIP", reason=str(e), module=MODULE)
version = getattr(module, "__version__", "unknown")
try:
    if not torch.cuda.is_available():
        emit("SKIP", reason="No accelerator", module=MODULE, version=version)
    q = torch.randn(2, 128, 8, 64, device="cuda", dtype=torch.float16)
    out = module.ops.memory_efficient_attention(q, q, q)
    emit("PASS", module=MODULE, version=version, output_shape=list(out.shape))
except Exception as e:
    emit("FAIL", module=MODULE, error=str(e))
"#;

const SMOKE_MULTI_DEVICE: &str = r#"
try:
    count = torch.cuda.device_count() if torch.cuda.is_available() else 0
    if count < 2:
        emit("SKIP", reason="Fewer than two accelerators", device_count=count)
    for i in range(count):
        x = torch.randn(128, 128, device=f"cuda:{i}")
        float((x @ x).sum().item())
    moved = torch.randn(64, device="cuda:0").to("cuda:1")
    emit("PASS", device_count=count, peer_copy=moved.device.index == 1)
except Exception as e:
    emit("FAIL", error=str(e))
"#;

const SMOKE_MEMORY_EFFICIENCY: &str = r#"
try:
    if not torch.cuda.is_available():
        emit("SKIP", reason="No accelerator")
    sizes = [256, 512, 1024, 2048]
    held = []
    for mib in sizes:
        held.append(torch.empty(mib * 1024 * 1024 // 4, dtype=torch.float32, device="cuda"))
    peak = torch.cuda.max_memory_allocated() // (1024 * 1024)
    del held
    torch.cuda.empty_cache()
    emit("PASS", allocated_mib=sizes, peak_mib=int(peak))
except Exception as e:
    emit("FAIL", error=str(e))
"#;

const SMOKE_ARCHITECTURE_SPECIFIC: &str = r#"
try:
    if not torch.cuda.is_available():
        emit("SKIP", reason="No accelerator")
    major, minor = torch.cuda.get_device_capability(0)
    features = {"compute_capability": f"{major}.{minor}", "tf32": major >= 8}
    dtype = torch.bfloat16 if torch.cuda.is_bf16_supported() else torch.float16
    with torch.autocast("cuda", dtype=dtype):
        x = torch.randn(512, 512, device="cuda")
        features["autocast_dtype"] = str((x @ x).dtype)
    q = torch.randn(1, 8, 128, 64, device="cuda", dtype=torch.float16)
    torch.nn.functional.scaled_dot_product_attention(q, q, q)
    features["scaled_dot_product_attention"] = True
    emit("PASS", **features)
except Exception as e:
    emit("FAIL", error=str(e))
"#;

/// Full script for one smoke check; takes the check name as `argv[1]` and
/// the secondary module as `argv[2]`.
#[must_use]
pub fn smoke(check: SmokeCheck) -> String {
    let body = match check {
        SmokeCheck::RuntimeBasic => SMOKE_RUNTIME_BASIC,
        SmokeCheck::SecondaryModule => SMOKE_SECONDARY_MODULE,
        SmokeCheck::MultiDevice => SMOKE_MULTI_DEVICE,
        SmokeCheck::MemoryEfficiency => SMOKE_MEMORY_EFFICIENCY,
        SmokeCheck::ArchitectureSpecific => SMOKE_ARCHITECTURE_SPECIFIC,
    };
    format!("{SMOKE_PRELUDE}{body}")
}
