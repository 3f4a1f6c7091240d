// Copyright 2026 postcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

const TEXT: &str = "The quick brown fox jumps over the lazy dog. \
Has anyone tried the new kernel release yet? My laptop stopped suspending after the update. \
Install gentoo. Post your desktop. This thread is for the discussion of programming languages and \
their tooling, compilers, build systems and everything in between. Please stay on topic. ";

/// `len` bytes of sample text starting at `offset`, wrapping around.
pub fn text(offset: usize, len: usize) -> String {
    TEXT.chars().cycle().skip(offset % TEXT.len()).take(len).collect()
}
