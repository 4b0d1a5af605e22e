// CUDA kernel source, compiled to PTX at runtime via NVRTC
//
// Every kernel is written once as a macro body and instantiated for float
// and double. Lowering kernels use one thread per *destination* cell:
//
//   lower_T   : one thread per lowered cell; reads its source or writes 0
//   inverse_T : one thread per input cell; sums every window that read it
//
// so each cell has exactly one writer and no atomics are needed, even where
// windows overlap. The index math is the same as patchwork_core::geometry:
//   lowered row = d*K*K + kr*K + kc
//   lowered col = b*outR*outC + i*outC + j
//   input cell  = (i*S + kr - P, j*S + kc - P) at depth d, batch b

/// All kernel source code in one compilation unit.
/// Functions are suffixed by dtype (_f32, _f64).
pub const KERNEL_SOURCE: &str = r#"

#define PW_FILL(NAME, T)                                                      \
extern "C" __global__ void NAME(T* out, T val, unsigned int n) {              \
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;                 \
    if (idx < n) out[idx] = val;                                              \
}

#define PW_SCALE(NAME, T)                                                     \
extern "C" __global__ void NAME(T* x, T alpha, unsigned int n) {              \
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;                 \
    if (idx < n) x[idx] = alpha * x[idx];                                     \
}

#define PW_AXPBY(NAME, T)                                                     \
extern "C" __global__ void NAME(const T* x, T* y, T alpha, T beta,           \
                                unsigned int n) {                             \
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;                 \
    if (idx < n) y[idx] = alpha * x[idx] + beta * y[idx];                     \
}

#define PW_LOWER(NAME, T)                                                     \
extern "C" __global__ void NAME(const T* in, T* out,                          \
                                int iR, int iC, int iD, int iB,               \
                                int K, int P, int S, int outR, int outC) {   \
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;                 \
    int windows = outR * outC;                                                \
    int cols = windows * iB;                                                  \
    unsigned int total = (unsigned int)(K * K * iD) * (unsigned int)cols;     \
    if (idx >= total) return;                                                 \
    int row = idx / cols;                                                     \
    int col = idx % cols;                                                     \
    int d = row / (K * K);                                                    \
    int kr = (row % (K * K)) / K;                                             \
    int kc = row % K;                                                         \
    int b = col / windows;                                                    \
    int i = (col % windows) / outC;                                           \
    int j = col % outC;                                                       \
    int r = i * S + kr - P;                                                   \
    int c = j * S + kc - P;                                                   \
    T v = (T)0;                                                               \
    if (r >= 0 && r < iR && c >= 0 && c < iC) {                               \
        v = in[c + r * iC + (d + b * iD) * iR * iC];                          \
    }                                                                         \
    out[idx] = v;                                                             \
}

#define PW_INVERSE(NAME, T)                                                   \
extern "C" __global__ void NAME(const T* grad, T* in,                         \
                                int iR, int iC, int iD, int iB,               \
                                int K, int P, int S, int outR, int outC) {   \
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;                 \
    if (idx >= (unsigned int)(iR * iC * iD * iB)) return;                     \
    int c = idx % iC;                                                         \
    int r = (idx / iC) % iR;                                                  \
    int m = idx / (iR * iC);                                                  \
    int d = m % iD;                                                           \
    int b = m / iD;                                                           \
    int windows = outR * outC;                                                \
    int cols = windows * iB;                                                  \
    T acc = (T)0;                                                             \
    for (int kr = 0; kr < K; ++kr) {                                          \
        int ty = r + P - kr;                                                  \
        if (ty < 0 || ty % S != 0) continue;                                  \
        int i = ty / S;                                                       \
        if (i >= outR) continue;                                              \
        for (int kc = 0; kc < K; ++kc) {                                      \
            int tx = c + P - kc;                                              \
            if (tx < 0 || tx % S != 0) continue;                              \
            int j = tx / S;                                                   \
            if (j >= outC) continue;                                          \
            int row = d * K * K + kr * K + kc;                                \
            acc += grad[row * cols + b * windows + i * outC + j];             \
        }                                                                     \
    }                                                                         \
    in[idx] += acc;                                                           \
}

#define PW_REMAP(NAME, T)                                                     \
extern "C" __global__ void NAME(const T* src, T* dst, unsigned int map_len,   \
                                unsigned int D, unsigned int B,               \
                                unsigned int n) {                             \
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;                 \
    if (idx >= n) return;                                                     \
    unsigned int flat = idx / map_len;                                        \
    unsigned int off = idx % map_len;                                         \
    unsigned int real_d = flat / B;                                           \
    unsigned int real_b = flat % B;                                           \
    dst[(real_d + real_b * D) * map_len + off] = src[idx];                    \
}

PW_FILL(fill_f32, float)
PW_FILL(fill_f64, double)
PW_SCALE(scale_f32, float)
PW_SCALE(scale_f64, double)
PW_AXPBY(axpby_f32, float)
PW_AXPBY(axpby_f64, double)
PW_LOWER(lower_f32, float)
PW_LOWER(lower_f64, double)
PW_INVERSE(inverse_lower_f32, float)
PW_INVERSE(inverse_lower_f64, double)
PW_REMAP(remap_f32, float)
PW_REMAP(remap_f64, double)
"#;

/// Module name used when loading PTX into the device.
pub const MODULE_NAME: &str = "patchwork_kernels";

/// Names of all kernel functions, required by `load_ptx`.
pub const KERNEL_NAMES: &[&str] = &[
    "fill_f32",
    "fill_f64",
    "scale_f32",
    "scale_f64",
    "axpby_f32",
    "axpby_f64",
    "lower_f32",
    "lower_f64",
    "inverse_lower_f32",
    "inverse_lower_f64",
    "remap_f32",
    "remap_f64",
];
